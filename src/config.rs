// Calibration, bus settings, topics and the loadable runtime configuration
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DriverError;

// Poll loop frequency (telemetry + move convergence)
pub const LOOP_HZ: u64 = 50;

// Move convergence: both actuators within this many ticks of target
pub const CONVERGENCE_THRESHOLD: i32 = 25;

// Poll cycles a move may take before it is reported as timed out (5 s at 50 Hz)
pub const MOVE_TIMEOUT_CYCLES: u32 = 250;

// Zenoh topics
pub const TOPIC_CMD_VELOCITY: &str = "dynamixel/cmd/velocity"; // commands
pub const TOPIC_CMD_TORQUE: &str = "dynamixel/cmd/torque";
pub const TOPIC_SRV_MOVE: &str = "dynamixel/srv/move"; // request/response
pub const TOPIC_STATE_POSITION: &str = "dynamixel/state/position"; // telemetry
pub const TOPIC_STATE_VELOCITY: &str = "dynamixel/state/velocity";
pub const TOPIC_STATE_TORQUE: &str = "dynamixel/state/torque";
pub const TOPIC_HEALTH: &str = "dynamixel/state/health";

// Bus configuration
pub const MOTOR_PORT: &str = "/dev/ttyUSB0";
pub const BAUD_RATE: u32 = 4_000_000;

// Enable hardware motor control (set to false to run against the simulated bus)
pub const MOTOR_ENABLED: bool = true;

// Actuator A (shoulder)
pub const DXL1_ID: u8 = 1;
pub const DXL1_OFFSET: i32 = 2365;
pub const DXL1_HOMING_OFFSET: i32 = 1024;
pub const DXL1_MIN_POS: i32 = -750;
pub const DXL1_MAX_POS: i32 = 1150;

// Actuator B (elbow)
pub const DXL2_ID: u8 = 2;
pub const DXL2_OFFSET: i32 = 1855;
pub const DXL2_MIN_POS: i32 = -1200;
pub const DXL2_MAX_POS: i32 = 1200;

/// Fixed calibration for one actuator on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActuatorConfig {
    /// Bus address
    pub id: u8,
    /// Added to a corrected position to get the raw register value
    pub position_offset: i32,
    /// Inclusive bounds on the offset-corrected position (ticks)
    pub safe_min: i32,
    pub safe_max: i32,
    /// Firmware zero-point, written once during init when present
    #[serde(default)]
    pub homing_offset: Option<i32>,
}

/// Everything the runtime needs, with the constants above as defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub port: String,
    pub baud_rate: u32,
    pub loop_hz: u64,
    pub convergence_threshold: i32,
    pub move_timeout_cycles: u32,
    pub motor_enabled: bool,
    pub actuators: [ActuatorConfig; 2],
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            port: MOTOR_PORT.to_string(),
            baud_rate: BAUD_RATE,
            loop_hz: LOOP_HZ,
            convergence_threshold: CONVERGENCE_THRESHOLD,
            move_timeout_cycles: MOVE_TIMEOUT_CYCLES,
            motor_enabled: MOTOR_ENABLED,
            actuators: [
                ActuatorConfig {
                    id: DXL1_ID,
                    position_offset: DXL1_OFFSET,
                    safe_min: DXL1_MIN_POS,
                    safe_max: DXL1_MAX_POS,
                    homing_offset: Some(DXL1_HOMING_OFFSET),
                },
                ActuatorConfig {
                    id: DXL2_ID,
                    position_offset: DXL2_OFFSET,
                    safe_min: DXL2_MIN_POS,
                    safe_max: DXL2_MAX_POS,
                    homing_offset: None,
                },
            ],
        }
    }
}

impl DriverConfig {
    /// Load a JSON config file. Missing fields fall back to the defaults.
    pub fn load(path: &Path) -> Result<Self, DriverError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DriverError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            DriverError::Configuration(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        let [a, b] = &self.actuators;
        if a.id == b.id {
            return Err(DriverError::Configuration(format!(
                "actuators share bus address {}",
                a.id
            )));
        }
        for actuator in &self.actuators {
            if actuator.safe_min > actuator.safe_max {
                return Err(DriverError::Configuration(format!(
                    "actuator {} has inverted safe zone [{}, {}]",
                    actuator.id, actuator.safe_min, actuator.safe_max
                )));
            }
        }
        if self.loop_hz == 0 || self.loop_hz > 1000 {
            return Err(DriverError::Configuration(format!(
                "loop rate {} Hz out of range",
                self.loop_hz
            )));
        }
        if self.convergence_threshold < 0 {
            return Err(DriverError::Configuration(
                "convergence threshold must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(1000 / self.loop_hz)
    }

    pub fn actuator_ids(&self) -> [u8; 2] {
        [self.actuators[0].id, self.actuators[1].id]
    }
}
