// Control-mode state machine
//
// Firmware refuses operating-mode writes while torque is engaged, so every
// transition is bracketed: torque off -> mode write -> torque on.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::registers::OPERATING_MODE;
use super::transaction::BusTransactionManager;
use super::transport::BusTransport;
use crate::error::DriverError;

/// Operating modes shared by both actuators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    Current,
    Velocity,
    Position,
}

impl ControlMode {
    /// Value of the operating mode register
    pub fn register_value(self) -> u8 {
        match self {
            ControlMode::Current => 0,
            ControlMode::Velocity => 1,
            ControlMode::Position => 3,
        }
    }
}

pub struct ModeStateMachine {
    current: ControlMode,
    transitions: usize,
}

impl ModeStateMachine {
    pub fn new(initial: ControlMode) -> Self {
        Self {
            current: initial,
            transitions: 0,
        }
    }

    pub fn current(&self) -> ControlMode {
        self.current
    }

    /// Number of bracketed transitions performed so far
    pub fn transitions(&self) -> usize {
        self.transitions
    }

    /// Write `mode` to every actuator without the torque bracket.
    /// Only valid while torque is known to be off (start-up).
    pub fn force<T: BusTransport>(
        &mut self,
        bus: &mut BusTransactionManager<T>,
        ids: &[u8],
        mode: ControlMode,
    ) -> Result<(), DriverError> {
        for &id in ids {
            bus.write_register(id, OPERATING_MODE, mode.register_value() as i32)
                .map_err(|source| DriverError::ModeSwitch { id, source })?;
        }
        self.current = mode;
        Ok(())
    }

    /// Switch to `requested` unless already there. Returns whether a transition ran.
    ///
    /// Torque is re-enabled even when the mode write is rejected; the rejection
    /// is then returned as [`DriverError::ModeSwitch`] and the machine records
    /// the attempted mode.
    pub fn ensure_mode<T: BusTransport>(
        &mut self,
        bus: &mut BusTransactionManager<T>,
        ids: &[u8],
        requested: ControlMode,
    ) -> Result<bool, DriverError> {
        if requested == self.current {
            return Ok(false);
        }

        info!("Switching control mode {:?} -> {:?}", self.current, requested);
        bus.set_torque(ids, false)?;

        let mut failure = None;
        for &id in ids {
            if let Err(source) = bus.write_register(id, OPERATING_MODE, requested.register_value() as i32) {
                warn!("Mode write rejected by actuator {}: {}", id, source);
                failure = Some(DriverError::ModeSwitch { id, source });
                break;
            }
        }

        bus.set_torque(ids, true)?;
        self.current = requested;
        self.transitions += 1;

        match failure {
            Some(e) => Err(e),
            None => Ok(true),
        }
    }
}
