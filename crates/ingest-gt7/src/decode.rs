//! Plaintext frame layout.
//!
//! Offsets (little endian):
//! 0x04 position, 0x10 velocity, 0x1C rotation, 0x28 orientation,
//! 0x2C angular velocity, 0x38 body height, 0x3C engine rpm, 0x40 IV seed,
//! 0x44 fuel level/capacity, 0x4C speed, 0x50 boost, 0x54 oil pressure,
//! 0x58 water/oil temp, 0x60 tire temps, 0x70 packet id, 0x74 laps,
//! 0x78 best/last lap, 0x80 time of day, 0x84 start position/car count,
//! 0x88 alert rpm, 0x8C calculated max speed, 0x8E flags, 0x90 gear byte,
//! 0x91 throttle, 0x92 brake, 0x94 road plane, 0xA4 wheel rps,
//! 0xB4 tire radius, 0xC4 suspension height, 0xD4 unused (32 bytes),
//! 0xF4 clutch, 0xFC transmission, 0x104 gear ratios, 0x124 car code.
//! `B` appends motion at 0x128; `~` additionally appends the extended
//! section at 0x13C.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use gt7_model::{
    ExtendedData, MotionData, SentinelPolicy, SimFlags, Snapshot, Variant, Vector3, WheelMetric,
};

use crate::cipher::{self, MAGIC};
use crate::error::{DecodeError, FrameError};

type LE = LittleEndian;
type Reader<'a> = Cursor<&'a [u8]>;

const UNUSED_BASE_LEN: usize = 32;
const RESERVED_TILDE_LEN: usize = 16;

fn vec3(c: &mut Reader<'_>) -> std::io::Result<Vector3> {
    Ok(Vector3 {
        x: c.read_f32::<LE>()?,
        y: c.read_f32::<LE>()?,
        z: c.read_f32::<LE>()?,
    })
}

fn wheels(c: &mut Reader<'_>) -> std::io::Result<WheelMetric<f32>> {
    Ok(WheelMetric {
        fl: c.read_f32::<LE>()?,
        fr: c.read_f32::<LE>()?,
        rl: c.read_f32::<LE>()?,
        rr: c.read_f32::<LE>()?,
    })
}

fn skip(c: &mut Reader<'_>, n: usize) {
    c.set_position(c.position() + n as u64);
}

pub fn decode(plaintext: &[u8], variant: Variant) -> Result<Snapshot, DecodeError> {
    decode_with(plaintext, variant, &SentinelPolicy::V1)
}

/// Decodes a decrypted frame. Bytes past the variant's length are ignored.
pub fn decode_with(
    plaintext: &[u8],
    variant: Variant,
    sentinels: &SentinelPolicy,
) -> Result<Snapshot, DecodeError> {
    let expected = variant.packet_len();
    if plaintext.len() < expected {
        return Err(DecodeError::Truncated {
            variant,
            expected,
            actual: plaintext.len(),
        });
    }

    let mut c = Cursor::new(&plaintext[..expected]);
    skip(&mut c, 4); // magic

    let position = vec3(&mut c)?;
    let velocity = vec3(&mut c)?;
    let rotation = vec3(&mut c)?;
    let orientation = c.read_f32::<LE>()?;
    let angular_velocity = vec3(&mut c)?;
    let body_height = c.read_f32::<LE>()?;
    let engine_rpm = c.read_f32::<LE>()?;
    skip(&mut c, 4); // IV seed
    let fuel_level = c.read_f32::<LE>()?;
    let fuel_capacity = c.read_f32::<LE>()?;
    let speed_mps = c.read_f32::<LE>()?;
    let boost_pressure = c.read_f32::<LE>()?;
    let oil_pressure = c.read_f32::<LE>()?;
    let water_temp = c.read_f32::<LE>()?;
    let oil_temp = c.read_f32::<LE>()?;
    let tire_temp = wheels(&mut c)?;

    let packet_id = c.read_i32::<LE>()?;
    let current_lap = sentinels.lap(c.read_i16::<LE>()?);
    let total_laps = c.read_i16::<LE>()?;
    let best_lap_ms = sentinels.lap_time(c.read_i32::<LE>()?);
    let last_lap_ms = sentinels.lap_time(c.read_i32::<LE>()?);
    let time_of_day_ms = sentinels.time_of_day(c.read_i32::<LE>()?);
    let race_start_position = c.read_i16::<LE>()?;
    let total_cars = c.read_i16::<LE>()?;
    let min_alert_rpm = c.read_u16::<LE>()?;
    let max_alert_rpm = c.read_u16::<LE>()?;
    let calc_max_speed = c.read_i16::<LE>()?;
    let flags = SimFlags::from_bits_retain(c.read_u16::<LE>()?);

    let gear = c.read_u8()?;
    let throttle = c.read_u8()?;
    let brake = c.read_u8()?;
    skip(&mut c, 1);

    let road_plane = vec3(&mut c)?;
    let road_plane_distance = c.read_f32::<LE>()?;
    let wheel_rps = wheels(&mut c)?;
    let tire_radius = wheels(&mut c)?;
    let suspension_height = wheels(&mut c)?;
    skip(&mut c, UNUSED_BASE_LEN);

    let clutch_pedal = c.read_f32::<LE>()?;
    let clutch_engagement = c.read_f32::<LE>()?;
    let transmission_rpm = c.read_f32::<LE>()?;
    let transmission_top_speed = c.read_f32::<LE>()?;
    let mut gear_ratios = [0f32; 8];
    for ratio in gear_ratios.iter_mut() {
        *ratio = c.read_f32::<LE>()?;
    }
    let car_code = c.read_i32::<LE>()?;

    let motion = if variant.has_motion() {
        Some(MotionData {
            wheel_rotation_rad: c.read_f32::<LE>()?,
            filler_float_fb: c.read_f32::<LE>()?,
            sway: c.read_f32::<LE>()?,
            heave: c.read_f32::<LE>()?,
            surge: c.read_f32::<LE>()?,
        })
    } else {
        None
    };

    let extended = if variant.has_extended() {
        let throttle_filtered = c.read_u8()?;
        let brake_filtered = c.read_u8()?;
        let unk_tilde_1 = c.read_u8()?;
        let unk_tilde_2 = c.read_u8()?;
        skip(&mut c, RESERVED_TILDE_LEN);
        Some(ExtendedData {
            throttle_filtered,
            brake_filtered,
            unk_tilde_1,
            unk_tilde_2,
            energy_recovery: c.read_f32::<LE>()?,
            unk_tilde_3: c.read_f32::<LE>()?,
        })
    } else {
        None
    };

    Ok(Snapshot {
        variant,
        position,
        velocity,
        rotation,
        orientation,
        angular_velocity,
        body_height,
        engine_rpm,
        fuel_level,
        fuel_capacity,
        speed_mps,
        boost_pressure,
        oil_pressure,
        water_temp,
        oil_temp,
        tire_temp,
        packet_id,
        current_lap,
        total_laps,
        best_lap_ms,
        last_lap_ms,
        time_of_day_ms,
        race_start_position,
        total_cars,
        min_alert_rpm,
        max_alert_rpm,
        calc_max_speed,
        flags,
        current_gear: gear & 0x0F,
        suggested_gear: sentinels.suggested_gear(gear >> 4),
        throttle,
        brake,
        road_plane,
        road_plane_distance,
        wheel_rps,
        tire_radius,
        suspension_height,
        clutch_pedal,
        clutch_engagement,
        transmission_rpm,
        transmission_top_speed,
        gear_ratios,
        car_code,
        motion,
        extended,
    })
}

/// Decrypt then decode one datagram.
pub fn decode_frame(
    blob: &[u8],
    variant: Variant,
    sentinels: &SentinelPolicy,
) -> Result<Snapshot, FrameError> {
    let plain = cipher::decrypt(blob, variant)?;
    Ok(decode_with(&plain, variant, sentinels)?)
}

struct Writer(Vec<u8>);

impl Writer {
    fn f32(&mut self, v: f32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }
    fn i32(&mut self, v: i32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }
    fn i16(&mut self, v: i16) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }
    fn u16(&mut self, v: u16) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }
    fn u8(&mut self, v: u8) {
        self.0.push(v);
    }
    fn zeros(&mut self, n: usize) {
        self.0.resize(self.0.len() + n, 0);
    }
    fn vec3(&mut self, v: &Vector3) {
        self.f32(v.x);
        self.f32(v.y);
        self.f32(v.z);
    }
    fn wheels(&mut self, w: &WheelMetric<f32>) {
        for v in w.to_array() {
            self.f32(v);
        }
    }
}

pub fn encode(snapshot: &Snapshot) -> Vec<u8> {
    encode_with(snapshot, &SentinelPolicy::V1)
}

/// Inverse of [`decode_with`]: plaintext (with magic) for the snapshot's
/// variant. Absent sections of that variant are zero-filled.
pub fn encode_with(s: &Snapshot, sentinels: &SentinelPolicy) -> Vec<u8> {
    let mut w = Writer(Vec::with_capacity(s.variant.packet_len()));
    w.0.extend_from_slice(&MAGIC.to_le_bytes());
    w.vec3(&s.position);
    w.vec3(&s.velocity);
    w.vec3(&s.rotation);
    w.f32(s.orientation);
    w.vec3(&s.angular_velocity);
    w.f32(s.body_height);
    w.f32(s.engine_rpm);
    w.zeros(4);
    w.f32(s.fuel_level);
    w.f32(s.fuel_capacity);
    w.f32(s.speed_mps);
    w.f32(s.boost_pressure);
    w.f32(s.oil_pressure);
    w.f32(s.water_temp);
    w.f32(s.oil_temp);
    w.wheels(&s.tire_temp);

    w.i32(s.packet_id);
    w.i16(s.current_lap.unwrap_or(sentinels.unset_lap));
    w.i16(s.total_laps);
    w.i32(s.best_lap_ms.unwrap_or(sentinels.unset_lap_time_ms));
    w.i32(s.last_lap_ms.unwrap_or(sentinels.unset_lap_time_ms));
    w.i32(s.time_of_day_ms.unwrap_or(sentinels.unset_time_of_day_ms));
    w.i16(s.race_start_position);
    w.i16(s.total_cars);
    w.u16(s.min_alert_rpm);
    w.u16(s.max_alert_rpm);
    w.i16(s.calc_max_speed);
    w.u16(s.flags.bits());

    let suggested = s.suggested_gear.unwrap_or(sentinels.no_suggested_gear);
    w.u8((suggested << 4) | (s.current_gear & 0x0F));
    w.u8(s.throttle);
    w.u8(s.brake);
    w.zeros(1);

    w.vec3(&s.road_plane);
    w.f32(s.road_plane_distance);
    w.wheels(&s.wheel_rps);
    w.wheels(&s.tire_radius);
    w.wheels(&s.suspension_height);
    w.zeros(UNUSED_BASE_LEN);

    w.f32(s.clutch_pedal);
    w.f32(s.clutch_engagement);
    w.f32(s.transmission_rpm);
    w.f32(s.transmission_top_speed);
    for ratio in s.gear_ratios {
        w.f32(ratio);
    }
    w.i32(s.car_code);

    if s.variant.has_motion() {
        let m = s.motion.unwrap_or_default();
        w.f32(m.wheel_rotation_rad);
        w.f32(m.filler_float_fb);
        w.f32(m.sway);
        w.f32(m.heave);
        w.f32(m.surge);
    }
    if s.variant.has_extended() {
        let e = s.extended.unwrap_or_default();
        w.u8(e.throttle_filtered);
        w.u8(e.brake_filtered);
        w.u8(e.unk_tilde_1);
        w.u8(e.unk_tilde_2);
        w.zeros(RESERVED_TILDE_LEN);
        w.f32(e.energy_recovery);
        w.f32(e.unk_tilde_3);
    }
    w.0
}
