use std::sync::Arc;

use gt7_ingest_core::SnapshotSink;
use gt7_model::Snapshot;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::subscribers::{Event, Subscribers};

/// What the game appears to be doing, inferred from one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameMode {
    Running,
    InMenu,
    AtTrack,
    InRace,
    Paused,
    RaceEnd,
}

impl GameMode {
    /// Mode implied by one snapshot's flags and lap counter.
    ///
    /// Leaving a pause is judged from the flags alone; engine rpm is not
    /// consulted to tell a quit from a resume. A quit that clears
    /// cars-on-track with the lap counter unset reads as `InMenu`, not
    /// `RaceEnd`.
    pub fn infer(s: &Snapshot) -> Self {
        let lap_set = s.current_lap.is_some();
        if s.is_loading() {
            GameMode::Running
        } else if !s.cars_on_track() {
            if lap_set {
                GameMode::AtTrack
            } else {
                GameMode::InMenu
            }
        } else if s.is_paused() {
            GameMode::Paused
        } else if lap_set {
            GameMode::InRace
        } else {
            GameMode::RaceEnd
        }
    }
}

/// The game entered `mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GameEvent {
    pub previous: GameMode,
    pub mode: GameMode,
}

impl Event for GameEvent {
    type Kind = GameMode;

    fn kind(&self) -> GameMode {
        self.mode
    }
}

pub type GameEvents = Subscribers<GameEvent>;

/// Edge-triggered game mode tracker.
pub struct GameEngine {
    subscribers: Arc<GameEvents>,
    mode: Arc<RwLock<Option<GameMode>>>,
}

impl GameEngine {
    pub fn new(subscribers: Arc<GameEvents>) -> Self {
        Self {
            subscribers,
            mode: Arc::new(RwLock::new(None)),
        }
    }

    pub fn subscribers(&self) -> Arc<GameEvents> {
        Arc::clone(&self.subscribers)
    }

    pub fn current_mode(&self) -> Option<GameMode> {
        *self.mode.read()
    }

    /// Shared view of the mode for readers outside the receive loop.
    pub fn mode_handle(&self) -> Arc<RwLock<Option<GameMode>>> {
        Arc::clone(&self.mode)
    }
}

impl SnapshotSink for GameEngine {
    fn on_snapshot(&mut self, snapshot: &Arc<Snapshot>) {
        let mode = GameMode::infer(snapshot);
        let previous = self.mode.write().replace(mode);
        match previous {
            Some(previous) if previous != mode => {
                tracing::debug!(?previous, ?mode, "game mode changed");
                self.subscribers.emit(&GameEvent { previous, mode });
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gt7_model::SimFlags;
    use parking_lot::Mutex;

    fn snap(flags: SimFlags, lap: Option<i16>) -> Arc<Snapshot> {
        Arc::new(Snapshot {
            flags,
            current_lap: lap,
            ..Snapshot::default()
        })
    }

    #[test]
    fn inference_table() {
        let on = SimFlags::CARS_ON_TRACK;
        assert_eq!(GameMode::infer(&snap(SimFlags::LOADING | on, Some(1))), GameMode::Running);
        assert_eq!(GameMode::infer(&snap(SimFlags::empty(), None)), GameMode::InMenu);
        assert_eq!(GameMode::infer(&snap(SimFlags::empty(), Some(0))), GameMode::AtTrack);
        assert_eq!(GameMode::infer(&snap(on, Some(1))), GameMode::InRace);
        assert_eq!(GameMode::infer(&snap(on | SimFlags::PAUSED, Some(1))), GameMode::Paused);
        assert_eq!(GameMode::infer(&snap(on | SimFlags::PAUSED, None)), GameMode::Paused);
        assert_eq!(GameMode::infer(&snap(on, None)), GameMode::RaceEnd);
    }

    #[test]
    fn quitting_from_pause_reads_flags_only() {
        let on = SimFlags::CARS_ON_TRACK;
        let paused = snap(on | SimFlags::PAUSED, Some(2));
        assert_eq!(GameMode::infer(&paused), GameMode::Paused);
        assert_eq!(GameMode::infer(&snap(SimFlags::empty(), None)), GameMode::InMenu);
        assert_eq!(GameMode::infer(&snap(on, Some(2))), GameMode::InRace);
    }

    #[test]
    fn fires_only_on_mode_change() {
        let subs = GameEvents::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        subs.subscribe_all(move |e: &GameEvent| {
            s.lock().push(e.mode);
            Ok(())
        });
        let in_race = Arc::new(Mutex::new(0));
        let r = Arc::clone(&in_race);
        subs.subscribe(GameMode::InRace, move |_| {
            *r.lock() += 1;
            Ok(())
        });

        let mut engine = GameEngine::new(Arc::clone(&subs));
        let on = SimFlags::CARS_ON_TRACK;
        for frame in [
            snap(SimFlags::empty(), None),
            snap(SimFlags::empty(), None),
            snap(SimFlags::empty(), Some(0)),
            snap(on, Some(1)),
            snap(on, Some(1)),
            snap(on | SimFlags::PAUSED, Some(1)),
            snap(on, Some(1)),
            snap(on, None),
        ] {
            engine.on_snapshot(&frame);
        }

        assert_eq!(
            *seen.lock(),
            vec![
                GameMode::AtTrack,
                GameMode::InRace,
                GameMode::Paused,
                GameMode::InRace,
                GameMode::RaceEnd
            ]
        );
        assert_eq!(*in_race.lock(), 2);
        assert_eq!(engine.current_mode(), Some(GameMode::RaceEnd));
    }

    #[test]
    fn first_snapshot_only_seeds() {
        let subs = GameEvents::new();
        let hits = Arc::new(Mutex::new(0));
        let h = Arc::clone(&hits);
        subs.subscribe_all(move |_| {
            *h.lock() += 1;
            Ok(())
        });
        let mut engine = GameEngine::new(subs);
        engine.on_snapshot(&snap(SimFlags::CARS_ON_TRACK, Some(3)));
        assert_eq!(*hits.lock(), 0);
        assert_eq!(engine.current_mode(), Some(GameMode::InRace));
    }
}
