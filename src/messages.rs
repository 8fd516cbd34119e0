// Payloads exchanged with teleop/scripts over zenoh (JSON)

use serde::{Deserialize, Serialize};

use crate::motor::driver::MoveResult;

// Command from teleop/scripts -> runtime
// One value per actuator: rad/s on the velocity topic, N·m on the torque topic
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct JointCommand {
    pub values: [f64; 2],
}

// Telemetry from runtime -> subscribers, one message per quantity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct JointState {
    pub values: [f64; 2],
}

/// Move request payload (radians)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MoveRequest {
    pub positions: [f64; 2],
}

/// How a move ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MoveOutcome {
    Converged,
    Aborted,
    TimedOut,
}

/// Move reply: where the arm actually is, not where it was asked to go
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MoveResponse {
    pub positions: [f64; 2],
    pub outcome: MoveOutcome,
}

impl From<MoveResult> for MoveResponse {
    fn from(result: MoveResult) -> Self {
        Self {
            positions: result.positions,
            outcome: result.outcome,
        }
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    SafetyStop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let cmd: JointCommand = serde_json::from_str(r#"{"values": [0.5, -1.0]}"#).unwrap();
        assert_eq!(cmd.values, [0.5, -1.0]);
        assert!(serde_json::from_str::<JointCommand>(r#"{"values": [0.5]}"#).is_err());
    }

    #[test]
    fn test_move_response_wire_format() {
        let response = MoveResponse {
            positions: [0.0, 0.25],
            outcome: MoveOutcome::TimedOut,
        };
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"positions":[0.0,0.25],"outcome":"timed_out"}"#
        );
        assert_eq!(
            serde_json::to_string(&RuntimeHealth::SafetyStop).unwrap(),
            r#""safety_stop""#
        );
    }
}
