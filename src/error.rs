// Error taxonomy for the actuator coordinator

use crate::motor::transport::CommError;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Opening the port or setting its baud rate failed
    #[error("Transport setup failed: {0}")]
    Transport(CommError),

    /// A bus round-trip failed; bus state is no longer trustworthy
    #[error("Bus communication error: {0}")]
    BusComm(#[from] CommError),

    /// Read of data that was not part of a completed round-trip
    #[error("No data for actuator {id} at register {address} ({width} bytes)")]
    DataUnavailable { id: u8, address: u16, width: u16 },

    /// Actuator/register not registered for batched reads, or bad config
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Writing the operating mode register was rejected
    #[error("Mode switch failed on actuator {id}: {source}")]
    ModeSwitch {
        id: u8,
        #[source]
        source: CommError,
    },

    /// Target or measured position outside the safe zone
    #[error("Safety violation: actuator {id} at {position} outside [{min}, {max}]")]
    SafetyViolation {
        id: u8,
        position: i32,
        min: i32,
        max: i32,
    },
}

impl DriverError {
    /// Errors after which the bus may no longer be driven
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DriverError::Transport(_) | DriverError::BusComm(_) | DriverError::Configuration(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(DriverError::BusComm(CommError::RxFail("timeout".into())).is_fatal());
        assert!(DriverError::Configuration("x".into()).is_fatal());
        assert!(
            !DriverError::ModeSwitch {
                id: 1,
                source: CommError::Status { id: 1, status: 2 }
            }
            .is_fatal()
        );
        assert!(
            !DriverError::SafetyViolation {
                id: 1,
                position: 2000,
                min: -750,
                max: 1150
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_display() {
        let msg = DriverError::DataUnavailable {
            id: 2,
            address: 132,
            width: 4,
        }
        .to_string();
        assert!(msg.contains("actuator 2"), "{}", msg);
        assert!(msg.contains("132"), "{}", msg);
    }
}
