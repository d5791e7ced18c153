//! Edge-triggered game, race and driver events derived from consecutive
//! telemetry snapshots.

pub mod driver;
pub mod game;
pub mod race;
mod subscribers;
pub mod track;

pub use driver::{DriverEngine, DriverEvent, DriverEventKind, DriverEvents, ShiftLightBounds};
pub use game::{GameEngine, GameEvent, GameEvents, GameMode};
pub use race::{RaceEngine, RaceEvent, RaceEventKind, RaceEvents};
pub use subscribers::{Event, Handler, SubscriptionId, Subscribers};
pub use track::{TrackBounds, TrackDetector, TrackError};
