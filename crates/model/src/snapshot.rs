use serde::{Deserialize, Serialize};

use crate::flags::SimFlags;
use crate::format::{format_lap_time, time_of_day};
use crate::variant::Variant;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Per-wheel value in wire order: front left, front right, rear left, rear right.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct WheelMetric<T> {
    pub fl: T,
    pub fr: T,
    pub rl: T,
    pub rr: T,
}

impl<T: Copy> WheelMetric<T> {
    pub const fn new(fl: T, fr: T, rl: T, rr: T) -> Self {
        Self { fl, fr, rl, rr }
    }

    pub fn to_array(&self) -> [T; 4] {
        [self.fl, self.fr, self.rl, self.rr]
    }
}

/// Section appended by heartbeat `B` (and `~`), 0x128..0x13C.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct MotionData {
    pub wheel_rotation_rad: f32,
    pub filler_float_fb: f32,
    pub sway: f32,
    pub heave: f32,
    pub surge: f32,
}

/// Section appended by heartbeat `~`, 0x13C..0x158.
///
/// The 16 bytes at 0x140..0x150 are unidentified and not kept.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct ExtendedData {
    pub throttle_filtered: u8,
    pub brake_filtered: u8,
    pub unk_tilde_1: u8,
    pub unk_tilde_2: u8,
    pub energy_recovery: f32,
    pub unk_tilde_3: f32,
}

/// One decoded telemetry frame.
///
/// Snapshots are shared as `Arc<Snapshot>` once decoded and never mutated.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Snapshot {
    pub variant: Variant,

    pub position: Vector3,
    pub velocity: Vector3,
    pub rotation: Vector3,
    /// Orientation relative to north, 1.0 facing north, 0.0 facing south.
    pub orientation: f32,
    pub angular_velocity: Vector3,
    pub body_height: f32,
    pub engine_rpm: f32,
    pub fuel_level: f32,
    pub fuel_capacity: f32,
    pub speed_mps: f32,
    pub boost_pressure: f32,
    pub oil_pressure: f32,
    pub water_temp: f32,
    pub oil_temp: f32,
    pub tire_temp: WheelMetric<f32>,

    pub packet_id: i32,
    pub current_lap: Option<i16>,
    pub total_laps: i16,
    pub best_lap_ms: Option<i32>,
    pub last_lap_ms: Option<i32>,
    pub time_of_day_ms: Option<i32>,
    pub race_start_position: i16,
    pub total_cars: i16,
    pub min_alert_rpm: u16,
    pub max_alert_rpm: u16,
    pub calc_max_speed: i16,
    pub flags: SimFlags,

    pub current_gear: u8,
    pub suggested_gear: Option<u8>,
    pub throttle: u8,
    pub brake: u8,

    pub road_plane: Vector3,
    pub road_plane_distance: f32,
    pub wheel_rps: WheelMetric<f32>,
    pub tire_radius: WheelMetric<f32>,
    pub suspension_height: WheelMetric<f32>,

    pub clutch_pedal: f32,
    pub clutch_engagement: f32,
    pub transmission_rpm: f32,
    pub transmission_top_speed: f32,
    pub gear_ratios: [f32; 8],
    pub car_code: i32,

    pub motion: Option<MotionData>,
    pub extended: Option<ExtendedData>,
}

impl Snapshot {
    pub fn speed_kph(&self) -> f32 {
        self.speed_mps * 3.6
    }

    pub fn speed_mph(&self) -> f32 {
        self.speed_mps * 2.236_936
    }

    pub fn cars_on_track(&self) -> bool {
        self.flags.contains(SimFlags::CARS_ON_TRACK)
    }

    pub fn is_paused(&self) -> bool {
        self.flags.contains(SimFlags::PAUSED)
    }

    pub fn is_loading(&self) -> bool {
        self.flags.contains(SimFlags::LOADING)
    }

    pub fn in_gear(&self) -> bool {
        self.flags.contains(SimFlags::IN_GEAR)
    }

    pub fn has_turbo(&self) -> bool {
        self.flags.contains(SimFlags::HAS_TURBO)
    }

    pub fn rev_limit(&self) -> bool {
        self.flags.contains(SimFlags::REV_LIMIT)
    }

    pub fn hand_brake_active(&self) -> bool {
        self.flags.contains(SimFlags::HANDBRAKE)
    }

    pub fn lights_active(&self) -> bool {
        self.flags.contains(SimFlags::LIGHTS)
    }

    pub fn high_beams(&self) -> bool {
        self.flags.contains(SimFlags::HIGH_BEAMS)
    }

    pub fn low_beams(&self) -> bool {
        self.flags.contains(SimFlags::LOW_BEAMS)
    }

    pub fn asm_active(&self) -> bool {
        self.flags.contains(SimFlags::ASM_ACTIVE)
    }

    pub fn tcs_active(&self) -> bool {
        self.flags.contains(SimFlags::TCS_ACTIVE)
    }

    pub fn best_lap_time(&self) -> Option<String> {
        self.best_lap_ms.map(format_lap_time)
    }

    pub fn last_lap_time(&self) -> Option<String> {
        self.last_lap_ms.map(format_lap_time)
    }

    pub fn time_of_day(&self) -> Option<time::Time> {
        self.time_of_day_ms.and_then(time_of_day)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_accessors_follow_bits() {
        let s = Snapshot {
            flags: SimFlags::CARS_ON_TRACK | SimFlags::TCS_ACTIVE | SimFlags::UNKNOWN_13,
            ..Snapshot::default()
        };
        assert!(s.cars_on_track());
        assert!(s.tcs_active());
        assert!(!s.asm_active());
        assert!(!s.is_paused());
        assert_eq!(s.flags.bits(), 0b0010_1000_0000_0001);
    }

    #[test]
    fn speed_conversions() {
        let s = Snapshot {
            speed_mps: 10.0,
            ..Snapshot::default()
        };
        assert!((s.speed_kph() - 36.0).abs() < 1e-4);
        assert!((s.speed_mph() - 22.369_36).abs() < 1e-3);
    }

    #[test]
    fn unset_lap_times_format_to_none() {
        let s = Snapshot {
            best_lap_ms: Some(83_456),
            ..Snapshot::default()
        };
        assert_eq!(s.best_lap_time().as_deref(), Some("01:23.456"));
        assert_eq!(s.last_lap_time(), None);
    }

    #[test]
    fn serializes_to_json() {
        let s = Snapshot {
            variant: Variant::B,
            motion: Some(MotionData {
                sway: 0.5,
                ..MotionData::default()
            }),
            ..Snapshot::default()
        };
        let json = serde_json::to_string(&s).unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
        assert!(json.contains("\"variant\":\"B\""));
    }
}
