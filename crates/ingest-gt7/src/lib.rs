//! Gran Turismo 7 telemetry: cipher, frame codec, heartbeat session and
//! console discovery.

pub mod cipher;
pub mod decode;
pub mod discovery;
mod error;
pub mod session;

pub use cipher::{decrypt, encrypt};
pub use decode::{decode, decode_frame, decode_with, encode, encode_with};
pub use discovery::{discover, discover_at, ConsoleInfo};
pub use error::{DecodeError, DecryptError, DiscoveryError, FrameError};
pub use session::{HeartbeatSession, SessionConfig, HEARTBEAT_PORT, RECEIVE_PORT};
