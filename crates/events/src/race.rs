use std::sync::Arc;

use gt7_ingest_core::SnapshotSink;
use gt7_model::Snapshot;
use serde::Serialize;

use crate::subscribers::{Event, Subscribers};
use crate::track::TrackDetector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RaceEvent {
    RaceStart,
    LapChange { lap: Option<i16> },
    BestLapTime { ms: Option<i32> },
    LastLapTime { ms: Option<i32> },
    RaceFinish { total_laps: i16 },
    TrackDetected { track_id: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RaceEventKind {
    RaceStart,
    LapChange,
    BestLapTime,
    LastLapTime,
    RaceFinish,
    TrackDetected,
}

impl Event for RaceEvent {
    type Kind = RaceEventKind;

    fn kind(&self) -> RaceEventKind {
        match self {
            RaceEvent::RaceStart => RaceEventKind::RaceStart,
            RaceEvent::LapChange { .. } => RaceEventKind::LapChange,
            RaceEvent::BestLapTime { .. } => RaceEventKind::BestLapTime,
            RaceEvent::LastLapTime { .. } => RaceEventKind::LastLapTime,
            RaceEvent::RaceFinish { .. } => RaceEventKind::RaceFinish,
            RaceEvent::TrackDetected { .. } => RaceEventKind::TrackDetected,
        }
    }
}

pub type RaceEvents = Subscribers<RaceEvent>;

fn finished(s: &Snapshot) -> bool {
    s.total_laps > 0 && s.current_lap.is_some_and(|lap| lap > s.total_laps)
}

pub struct RaceEngine {
    subscribers: Arc<RaceEvents>,
    last: Option<Arc<Snapshot>>,
    detector: Option<TrackDetector>,
    track_id: Option<i32>,
}

impl RaceEngine {
    pub fn new(subscribers: Arc<RaceEvents>) -> Self {
        Self {
            subscribers,
            last: None,
            detector: None,
            track_id: None,
        }
    }

    pub fn with_track_detector(mut self, detector: TrackDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn subscribers(&self) -> Arc<RaceEvents> {
        Arc::clone(&self.subscribers)
    }

    fn detect_track(&mut self, s: &Snapshot) -> Option<i32> {
        let detector = self.detector.as_mut()?;
        let detected = detector.detect(s);
        let fresh = match (self.track_id, detected) {
            (None, Some(id)) => Some(id),
            _ => None,
        };
        self.track_id = detected;
        fresh
    }
}

impl SnapshotSink for RaceEngine {
    fn on_snapshot(&mut self, snapshot: &Arc<Snapshot>) {
        let s = snapshot.as_ref();
        let detected = self.detect_track(s);
        let Some(prev) = self.last.replace(Arc::clone(snapshot)) else {
            return;
        };

        let mut events = Vec::new();
        if matches!(prev.current_lap, None | Some(0)) && s.current_lap == Some(1) {
            events.push(RaceEvent::RaceStart);
        }
        if prev.current_lap != s.current_lap {
            events.push(RaceEvent::LapChange { lap: s.current_lap });
        }
        if prev.best_lap_ms != s.best_lap_ms {
            events.push(RaceEvent::BestLapTime { ms: s.best_lap_ms });
        }
        if prev.last_lap_ms != s.last_lap_ms {
            events.push(RaceEvent::LastLapTime { ms: s.last_lap_ms });
        }
        if !finished(&prev) && finished(s) {
            events.push(RaceEvent::RaceFinish {
                total_laps: s.total_laps,
            });
        }
        if let Some(track_id) = detected {
            tracing::info!(track_id, "track detected");
            events.push(RaceEvent::TrackDetected { track_id });
        }

        for event in &events {
            self.subscribers.emit(event);
        }
    }
}
