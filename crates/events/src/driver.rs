use std::sync::Arc;

use gt7_ingest_core::SnapshotSink;
use gt7_model::Snapshot;
use serde::{Deserialize, Serialize};

use crate::subscribers::{Event, Subscribers};

/// Shift light thresholds in engine rpm. Unset bounds use the car's
/// alert rpm from the frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftLightBounds {
    pub low: Option<f32>,
    pub high: Option<f32>,
}

impl ShiftLightBounds {
    fn low_for(&self, s: &Snapshot) -> f32 {
        self.low.unwrap_or(f32::from(s.min_alert_rpm))
    }

    fn high_for(&self, s: &Snapshot) -> f32 {
        self.high.unwrap_or(f32::from(s.max_alert_rpm))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum DriverEvent {
    GearChange { from: u8, to: u8 },
    FlashLights,
    Handbrake,
    SuggestedGear { gear: Option<u8> },
    Tcs { active: bool },
    Asm { active: bool },
    RevLimit { active: bool },
    Brake,
    Throttle,
    ShiftLightLow { rpm: f32 },
    ShiftLightHigh { rpm: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DriverEventKind {
    GearChange,
    FlashLights,
    Handbrake,
    SuggestedGear,
    Tcs,
    Asm,
    RevLimit,
    Brake,
    Throttle,
    ShiftLightLow,
    ShiftLightHigh,
}

impl Event for DriverEvent {
    type Kind = DriverEventKind;

    fn kind(&self) -> DriverEventKind {
        match self {
            DriverEvent::GearChange { .. } => DriverEventKind::GearChange,
            DriverEvent::FlashLights => DriverEventKind::FlashLights,
            DriverEvent::Handbrake => DriverEventKind::Handbrake,
            DriverEvent::SuggestedGear { .. } => DriverEventKind::SuggestedGear,
            DriverEvent::Tcs { .. } => DriverEventKind::Tcs,
            DriverEvent::Asm { .. } => DriverEventKind::Asm,
            DriverEvent::RevLimit { .. } => DriverEventKind::RevLimit,
            DriverEvent::Brake => DriverEventKind::Brake,
            DriverEvent::Throttle => DriverEventKind::Throttle,
            DriverEvent::ShiftLightLow { .. } => DriverEventKind::ShiftLightLow,
            DriverEvent::ShiftLightHigh { .. } => DriverEventKind::ShiftLightHigh,
        }
    }
}

pub type DriverEvents = Subscribers<DriverEvent>;

fn rose(prev: bool, now: bool) -> bool {
    !prev && now
}

fn crossed(prev_rpm: f32, rpm: f32, bound: f32) -> bool {
    prev_rpm < bound && rpm >= bound
}

pub struct DriverEngine {
    subscribers: Arc<DriverEvents>,
    shift_lights: ShiftLightBounds,
    last: Option<Arc<Snapshot>>,
}

impl DriverEngine {
    pub fn new(subscribers: Arc<DriverEvents>) -> Self {
        Self {
            subscribers,
            shift_lights: ShiftLightBounds::default(),
            last: None,
        }
    }

    pub fn with_shift_lights(mut self, bounds: ShiftLightBounds) -> Self {
        self.shift_lights = bounds;
        self
    }

    pub fn subscribers(&self) -> Arc<DriverEvents> {
        Arc::clone(&self.subscribers)
    }

    fn derive(&self, prev: &Snapshot, s: &Snapshot) -> Vec<DriverEvent> {
        let mut events = Vec::new();
        if prev.current_gear != s.current_gear {
            events.push(DriverEvent::GearChange {
                from: prev.current_gear,
                to: s.current_gear,
            });
        }
        if rose(prev.high_beams(), s.high_beams()) {
            events.push(DriverEvent::FlashLights);
        }
        if rose(prev.hand_brake_active(), s.hand_brake_active()) {
            events.push(DriverEvent::Handbrake);
        }
        if prev.suggested_gear != s.suggested_gear {
            events.push(DriverEvent::SuggestedGear {
                gear: s.suggested_gear,
            });
        }
        if prev.tcs_active() != s.tcs_active() {
            events.push(DriverEvent::Tcs {
                active: s.tcs_active(),
            });
        }
        if prev.asm_active() != s.asm_active() {
            events.push(DriverEvent::Asm {
                active: s.asm_active(),
            });
        }
        if prev.rev_limit() != s.rev_limit() {
            events.push(DriverEvent::RevLimit {
                active: s.rev_limit(),
            });
        }
        if prev.brake == 0 && s.brake > 0 {
            events.push(DriverEvent::Brake);
        }
        if prev.throttle == 0 && s.throttle > 0 {
            events.push(DriverEvent::Throttle);
        }
        let rpm = s.engine_rpm;
        if crossed(prev.engine_rpm, rpm, self.shift_lights.low_for(s)) {
            events.push(DriverEvent::ShiftLightLow { rpm });
        }
        if crossed(prev.engine_rpm, rpm, self.shift_lights.high_for(s)) {
            events.push(DriverEvent::ShiftLightHigh { rpm });
        }
        events
    }
}

impl SnapshotSink for DriverEngine {
    fn on_snapshot(&mut self, snapshot: &Arc<Snapshot>) {
        let Some(prev) = self.last.replace(Arc::clone(snapshot)) else {
            return;
        };
        for event in self.derive(&prev, snapshot) {
            self.subscribers.emit(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gt7_model::SimFlags;
    use parking_lot::Mutex;

    fn run(engine: &mut DriverEngine, frames: &[Snapshot]) -> Vec<DriverEvent> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let id = engine.subscribers().subscribe_all(move |e: &DriverEvent| {
            s.lock().push(*e);
            Ok(())
        });
        for frame in frames {
            engine.on_snapshot(&Arc::new(frame.clone()));
        }
        engine.subscribers().unsubscribe(id);
        let events = seen.lock().clone();
        events
    }

    fn revs(rpm: f32) -> Snapshot {
        Snapshot {
            engine_rpm: rpm,
            min_alert_rpm: 6500,
            max_alert_rpm: 7200,
            ..Snapshot::default()
        }
    }

    #[test]
    fn shift_light_high_fires_once_on_crossing() {
        let mut engine = DriverEngine::new(DriverEvents::new());
        let events = run(
            &mut engine,
            &[revs(6000.0), revs(6400.0), revs(7300.0), revs(7400.0), revs(7100.0), revs(7000.0)],
        );
        assert_eq!(
            events,
            vec![
                DriverEvent::ShiftLightLow { rpm: 7300.0 },
                DriverEvent::ShiftLightHigh { rpm: 7300.0 },
            ]
        );
    }

    #[test]
    fn configured_bounds_override_alert_rpm() {
        let bounds = ShiftLightBounds {
            low: None,
            high: Some(5000.0),
        };
        let mut engine = DriverEngine::new(DriverEvents::new()).with_shift_lights(bounds);
        let events = run(&mut engine, &[revs(4900.0), revs(5000.0)]);
        assert_eq!(events, vec![DriverEvent::ShiftLightHigh { rpm: 5000.0 }]);
    }

    #[test]
    fn flag_and_pedal_edges_in_fixed_order() {
        let mut engine = DriverEngine::new(DriverEvents::new());
        let idle = Snapshot {
            current_gear: 1,
            suggested_gear: None,
            ..Snapshot::default()
        };
        let busy = Snapshot {
            current_gear: 2,
            suggested_gear: Some(3),
            flags: SimFlags::HIGH_BEAMS
                | SimFlags::HANDBRAKE
                | SimFlags::TCS_ACTIVE
                | SimFlags::ASM_ACTIVE
                | SimFlags::REV_LIMIT,
            brake: 40,
            throttle: 200,
            ..Snapshot::default()
        };
        let events = run(&mut engine, &[idle.clone(), busy.clone(), busy, idle]);
        assert_eq!(
            events,
            vec![
                DriverEvent::GearChange { from: 1, to: 2 },
                DriverEvent::FlashLights,
                DriverEvent::Handbrake,
                DriverEvent::SuggestedGear { gear: Some(3) },
                DriverEvent::Tcs { active: true },
                DriverEvent::Asm { active: true },
                DriverEvent::RevLimit { active: true },
                DriverEvent::Brake,
                DriverEvent::Throttle,
                DriverEvent::GearChange { from: 2, to: 1 },
                DriverEvent::SuggestedGear { gear: None },
                DriverEvent::Tcs { active: false },
                DriverEvent::Asm { active: false },
                DriverEvent::RevLimit { active: false },
            ]
        );
    }

    #[test]
    fn subscribing_to_one_kind() {
        let subs = DriverEvents::new();
        let gears = Arc::new(Mutex::new(Vec::new()));
        let g = Arc::clone(&gears);
        subs.subscribe(DriverEventKind::GearChange, move |e| {
            if let DriverEvent::GearChange { to, .. } = e {
                g.lock().push(*to);
            }
            Ok(())
        });
        let mut engine = DriverEngine::new(subs);
        for gear in [1, 2, 2, 3, 2] {
            engine.on_snapshot(&Arc::new(Snapshot {
                current_gear: gear,
                throttle: 100,
                ..Snapshot::default()
            }));
        }
        assert_eq!(*gears.lock(), vec![2, 3, 2]);
    }
}
