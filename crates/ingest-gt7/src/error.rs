use std::net::IpAddr;
use std::time::Duration;

use gt7_model::Variant;

#[derive(Debug, thiserror::Error)]
pub enum DecryptError {
    #[error("datagram too short for an IV seed ({len} bytes)")]
    TooShort { len: usize },
    #[error("bad magic {found:#010x} after decryption")]
    BadMagic { found: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated {variant} frame: expected {expected} bytes, got {actual}")]
    Truncated {
        variant: Variant,
        expected: usize,
        actual: usize,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A single bad datagram. Never terminal for a session.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error(transparent)]
    Decrypt(#[from] DecryptError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("no PlayStation answered within {timeout:?}")]
    NotFound { timeout: Duration },
    #[error("PlayStation at {0} is on standby")]
    OnStandby(IpAddr),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
