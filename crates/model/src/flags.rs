use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Simulator state word at offset 0x8E.
    ///
    /// Bits 12-15 are reported by the console but their meaning is unknown;
    /// they are retained so the raw word survives a decode/encode cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SimFlags: u16 {
        const CARS_ON_TRACK = 1 << 0;
        const PAUSED = 1 << 1;
        const LOADING = 1 << 2;
        const IN_GEAR = 1 << 3;
        const HAS_TURBO = 1 << 4;
        const REV_LIMIT = 1 << 5;
        const HANDBRAKE = 1 << 6;
        const LIGHTS = 1 << 7;
        const HIGH_BEAMS = 1 << 8;
        const LOW_BEAMS = 1 << 9;
        const ASM_ACTIVE = 1 << 10;
        const TCS_ACTIVE = 1 << 11;
        const UNKNOWN_12 = 1 << 12;
        const UNKNOWN_13 = 1 << 13;
        const UNKNOWN_14 = 1 << 14;
        const UNKNOWN_15 = 1 << 15;
    }
}
