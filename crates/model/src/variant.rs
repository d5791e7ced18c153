use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Base packet length (heartbeat `A`): 0x128 bytes.
pub const PACKET_LEN_A: usize = 0x128;
/// Base + motion section (heartbeat `B`): 0x13C bytes.
pub const PACKET_LEN_B: usize = 0x13C;
/// Base + motion + extended section (heartbeat `~`): 0x158 bytes.
pub const PACKET_LEN_TILDE: usize = 0x158;

/// Wire format requested by the heartbeat tag.
///
/// The console answers every heartbeat with frames in the matching layout,
/// each variant also uses its own nonce XOR key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Variant {
    #[default]
    #[serde(rename = "A")]
    A,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "~")]
    Tilde,
}

impl Variant {
    pub const ALL: [Variant; 3] = [Variant::A, Variant::B, Variant::Tilde];

    /// Single byte sent as the heartbeat payload.
    pub const fn tag(self) -> u8 {
        match self {
            Variant::A => b'A',
            Variant::B => b'B',
            Variant::Tilde => b'~',
        }
    }

    /// Encrypted (and plaintext) frame length.
    pub const fn packet_len(self) -> usize {
        match self {
            Variant::A => PACKET_LEN_A,
            Variant::B => PACKET_LEN_B,
            Variant::Tilde => PACKET_LEN_TILDE,
        }
    }

    /// Constant XORed into the IV seed to build the Salsa20 nonce.
    pub const fn xor_key(self) -> u32 {
        match self {
            Variant::A => 0xDEAD_BEAF,
            Variant::B => 0xDEAD_BEEF,
            Variant::Tilde => 0x55FA_BB4F,
        }
    }

    pub const fn has_motion(self) -> bool {
        matches!(self, Variant::B | Variant::Tilde)
    }

    pub const fn has_extended(self) -> bool {
        matches!(self, Variant::Tilde)
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'A' | b'a' => Some(Variant::A),
            b'B' | b'b' => Some(Variant::B),
            b'~' => Some(Variant::Tilde),
            _ => None,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag() as char)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown heartbeat variant {0:?} (expected \"A\", \"B\" or \"~\")")]
pub struct UnknownVariant(pub String);

impl FromStr for Variant {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().as_bytes() {
            [tag] => Variant::from_tag(*tag).ok_or_else(|| UnknownVariant(s.to_string())),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}
