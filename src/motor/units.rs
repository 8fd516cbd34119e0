// Raw register units <-> physical units
//
// Linear scales only; out-of-range values are the safety monitor's problem.
// Float -> tick conversions round to nearest and saturate at the integer range.

use std::f64::consts::TAU;

/// Encoder resolution: 4096 ticks per revolution
pub const TICKS_PER_REVOLUTION: f64 = 4096.0;

/// Velocity register unit (rev/min per tick)
pub const RPM_PER_TICK: f64 = 0.229;

/// Current register unit (A per tick)
pub const AMPS_PER_TICK: f64 = 0.00269;

/// Torque constant (N·m per A)
pub const NM_PER_AMP: f64 = 1.667;

const RAD_PER_TICK: f64 = TAU / TICKS_PER_REVOLUTION;
const RAD_S_PER_TICK: f64 = RPM_PER_TICK * TAU / 60.0;
const NM_PER_TICK: f64 = AMPS_PER_TICK * NM_PER_AMP;

/// Position ticks -> radians
pub fn rad_from_ticks(ticks: i32) -> f64 {
    ticks as f64 * RAD_PER_TICK
}

/// Radians -> position ticks
pub fn ticks_from_rad(rad: f64) -> i32 {
    (rad / RAD_PER_TICK).round() as i32
}

/// Velocity ticks -> rad/s
pub fn rad_s_from_ticks(ticks: i32) -> f64 {
    ticks as f64 * RAD_S_PER_TICK
}

/// rad/s -> velocity ticks
pub fn ticks_from_rad_s(rad_s: f64) -> i32 {
    (rad_s / RAD_S_PER_TICK).round() as i32
}

/// Current ticks -> torque (N·m)
pub fn torque_from_ticks(ticks: i16) -> f64 {
    ticks as f64 * NM_PER_TICK
}

/// Torque (N·m) -> current ticks
pub fn ticks_from_torque(torque: f64) -> i16 {
    (torque / NM_PER_TICK).round() as i16
}

/// Raw present position -> offset-corrected position.
/// Saturates at the i32 range; a saturated value is outside any safe zone.
pub fn corrected_position(raw: i32, offset: i32) -> i32 {
    (raw as i64 - offset as i64).clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Offset-corrected position -> raw register value (saturating)
pub fn raw_position(corrected: i32, offset: i32) -> i32 {
    corrected.saturating_add(offset)
}
