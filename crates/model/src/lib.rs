//! Data model for decoded GT7 telemetry frames.

mod flags;
mod format;
mod sentinel;
mod snapshot;
mod variant;

pub use flags::SimFlags;
pub use format::{format_lap_time, format_time_of_day, time_of_day};
pub use sentinel::SentinelPolicy;
pub use snapshot::{ExtendedData, MotionData, Snapshot, Vector3, WheelMetric};
pub use variant::{UnknownVariant, Variant, PACKET_LEN_A, PACKET_LEN_B, PACKET_LEN_TILDE};
