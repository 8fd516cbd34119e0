// Control table for Dynamixel X-series (XM430-W350)
// https://emanual.robotis.com/docs/en/dxl/x/xm430-w350/#control-table

use super::transport::RegisterSpec;

// EEPROM area (written with torque off)
pub const OPERATING_MODE: RegisterSpec = RegisterSpec::new(11, 1);
pub const HOMING_OFFSET: RegisterSpec = RegisterSpec::new(20, 4);

// RAM area
pub const TORQUE_ENABLE: RegisterSpec = RegisterSpec::new(64, 1);
pub const GOAL_CURRENT: RegisterSpec = RegisterSpec::new(102, 2);
pub const GOAL_VELOCITY: RegisterSpec = RegisterSpec::new(104, 4);
pub const GOAL_POSITION: RegisterSpec = RegisterSpec::new(116, 4);
pub const PRESENT_CURRENT: RegisterSpec = RegisterSpec::new(126, 2); // signed
pub const PRESENT_VELOCITY: RegisterSpec = RegisterSpec::new(128, 4); // signed
pub const PRESENT_POSITION: RegisterSpec = RegisterSpec::new(132, 4); // signed

/// Control table bytes modelled by the simulator (through present position)
pub const CONTROL_TABLE_SIZE: usize = 147;

pub const TORQUE_ON: i32 = 1;
pub const TORQUE_OFF: i32 = 0;

/// Registers read every telemetry poll
pub const TELEMETRY_REGISTERS: [RegisterSpec; 3] =
    [PRESENT_POSITION, PRESENT_VELOCITY, PRESENT_CURRENT];

/// Registers read while a move converges
pub const MOVE_REGISTERS: [RegisterSpec; 1] = [PRESENT_POSITION];
