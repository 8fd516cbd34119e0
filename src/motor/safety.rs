// Safety envelope: static per-actuator position bounds and the torque-off interlock

use tracing::warn;

use super::transaction::BusTransactionManager;
use super::transport::{BusTransport, CommResult};
use crate::config::ActuatorConfig;
use crate::error::DriverError;

/// Closed tick range on an offset-corrected position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub id: u8,
    pub min: i32,
    pub max: i32,
}

impl Bounds {
    pub fn contains(&self, position: i32) -> bool {
        (self.min..=self.max).contains(&position)
    }
}

pub struct SafetyMonitor {
    bounds: [Bounds; 2],
    stops: usize,
}

impl SafetyMonitor {
    pub fn new(actuators: &[ActuatorConfig; 2]) -> Self {
        Self {
            bounds: actuators.map(|a| Bounds {
                id: a.id,
                min: a.safe_min,
                max: a.safe_max,
            }),
            stops: 0,
        }
    }

    pub fn bounds(&self) -> &[Bounds; 2] {
        &self.bounds
    }

    /// True iff both corrected positions lie within their bounds
    pub fn within_safe_zone(&self, positions: [i32; 2]) -> bool {
        self.check(positions).is_ok()
    }

    /// Like [`within_safe_zone`](Self::within_safe_zone), naming the first offender
    pub fn check(&self, positions: [i32; 2]) -> Result<(), DriverError> {
        for (bounds, position) in self.bounds.iter().zip(positions) {
            if !bounds.contains(position) {
                return Err(DriverError::SafetyViolation {
                    id: bounds.id,
                    position,
                    min: bounds.min,
                    max: bounds.max,
                });
            }
        }
        Ok(())
    }

    /// Disable torque on every actuator, bypassing the mode bracket.
    /// Safe to repeat; each call just re-sends the disable writes.
    pub fn emergency_stop<T: BusTransport>(
        &mut self,
        bus: &mut BusTransactionManager<T>,
    ) -> CommResult<()> {
        self.stops += 1;
        warn!("EMERGENCY STOP -- disabling torque");
        let ids = self.bounds.map(|b| b.id);
        bus.set_torque(&ids, false)
    }

    /// Number of emergency stops issued
    pub fn stops(&self) -> usize {
        self.stops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;
    use crate::motor::registers::TORQUE_ENABLE;
    use crate::motor::sim::{BusWrite, SimulatedBus};

    fn monitor() -> SafetyMonitor {
        // [-750, 1150] and [-1200, 1200]
        SafetyMonitor::new(&DriverConfig::default().actuators)
    }

    #[test]
    fn test_boundaries_are_inside() {
        let m = monitor();
        assert!(m.within_safe_zone([0, 0]));
        assert!(m.within_safe_zone([-750, -1200]));
        assert!(m.within_safe_zone([1150, 1200]));
        assert!(m.within_safe_zone([-750, 1200]));
    }

    #[test]
    fn test_outside_either_bound() {
        let m = monitor();
        assert!(!m.within_safe_zone([1151, 0]));
        assert!(!m.within_safe_zone([-751, 0]));
        assert!(!m.within_safe_zone([0, 1201]));
        assert!(!m.within_safe_zone([0, -1201]));
        assert!(!m.within_safe_zone([i32::MAX, i32::MIN]));
    }

    #[test]
    fn test_check_names_offender() {
        let m = monitor();
        match m.check([0, 1500]) {
            Err(DriverError::SafetyViolation { id, position, max, .. }) => {
                assert_eq!((id, position, max), (2, 1500, 1200));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_emergency_stop_is_idempotent() {
        let mut m = monitor();
        let mut bus = BusTransactionManager::new(SimulatedBus::new(&[1, 2]));
        bus.set_torque(&[1, 2], true).unwrap();
        bus.transport_mut().clear_log();

        m.emergency_stop(&mut bus).unwrap();
        m.emergency_stop(&mut bus).unwrap();

        assert!(!bus.transport().torque_enabled(1));
        assert!(!bus.transport().torque_enabled(2));
        assert_eq!(m.stops(), 2);
        // Nothing but torque-disable writes
        assert_eq!(bus.transport().writes().len(), 4);
        assert!(bus.transport().writes().iter().all(|w| matches!(
            w,
            BusWrite::Register { address, data, .. }
                if *address == TORQUE_ENABLE.address && data == &vec![0]
        )));
    }
}
