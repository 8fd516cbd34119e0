// Actuator-bus coordinator for the two-joint arm
//
// Owns the transaction manager, the mode machine and the safety monitor, and
// turns physical-unit requests into batched register traffic. All bus access
// goes through one `&mut self`, so only one transaction is ever in flight.

use tracing::{debug, error, info, warn};

use super::mode::{ControlMode, ModeStateMachine};
use super::registers::{
    GOAL_CURRENT, GOAL_POSITION, GOAL_VELOCITY, HOMING_OFFSET, MOVE_REGISTERS, PRESENT_CURRENT,
    PRESENT_POSITION, PRESENT_VELOCITY, TELEMETRY_REGISTERS,
};
use super::safety::SafetyMonitor;
use super::transaction::BusTransactionManager;
use super::transport::BusTransport;
use super::units::{
    corrected_position, rad_from_ticks, rad_s_from_ticks, raw_position, ticks_from_rad,
    ticks_from_rad_s, ticks_from_torque, torque_from_ticks,
};
use crate::config::{ActuatorConfig, DriverConfig};
use crate::error::DriverError;
use crate::messages::MoveOutcome;

/// One telemetry sample, in physical units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    pub position: [f64; 2],
    pub velocity: [f64; 2],
    pub torque: [f64; 2],
    /// False when this sample tripped the emergency stop
    pub safe: bool,
}

/// How a move ended, with the measured (corrected) positions in radians
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveResult {
    pub outcome: MoveOutcome,
    pub positions: [f64; 2],
}

/// Progress of the single in-flight move, advanced once per position sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveState {
    Idle,
    /// Goals written, no sample taken yet. Targets are raw ticks.
    Commanded { target: [i32; 2] },
    Converging { target: [i32; 2], cycles: u32 },
    Converged(MoveResult),
    Aborted(MoveResult),
    TimedOut(MoveResult),
}

impl MoveState {
    pub fn is_active(&self) -> bool {
        matches!(self, MoveState::Commanded { .. } | MoveState::Converging { .. })
    }

    pub fn result(&self) -> Option<MoveResult> {
        match self {
            MoveState::Converged(r) | MoveState::Aborted(r) | MoveState::TimedOut(r) => Some(*r),
            _ => None,
        }
    }
}

pub struct Coordinator<T: BusTransport> {
    bus: BusTransactionManager<T>,
    mode: ModeStateMachine,
    safety: SafetyMonitor,
    actuators: [ActuatorConfig; 2],
    ids: [u8; 2],
    baud_rate: u32,
    convergence_threshold: i32,
    move_timeout_cycles: u32,
    motion: MoveState,
    torque_enabled: bool,
    /// Transport opened by `init` and not yet shut down
    active: bool,
    /// Offset-corrected ticks from the most recent position sample
    last_positions: Option<[i32; 2]>,
}

impl<T: BusTransport> Coordinator<T> {
    pub fn new(transport: T, config: &DriverConfig) -> Self {
        Self {
            bus: BusTransactionManager::new(transport),
            mode: ModeStateMachine::new(ControlMode::Current),
            safety: SafetyMonitor::new(&config.actuators),
            actuators: config.actuators,
            ids: config.actuator_ids(),
            baud_rate: config.baud_rate,
            convergence_threshold: config.convergence_threshold,
            move_timeout_cycles: config.move_timeout_cycles,
            motion: MoveState::Idle,
            torque_enabled: false,
            active: false,
            last_positions: None,
        }
    }

    /// Open the bus and bring both actuators up in current mode with torque on.
    /// Any failure here is fatal.
    pub fn init(&mut self) -> Result<(), DriverError> {
        info!("Initializing actuators {:?}", self.ids);

        self.bus.transport_mut().open().map_err(DriverError::Transport)?;
        self.active = true;
        info!("Port opened successfully");
        self.bus
            .transport_mut()
            .set_baud_rate(self.baud_rate)
            .map_err(DriverError::Transport)?;
        info!("Baudrate set to: {}", self.baud_rate);

        for &id in &self.ids {
            for spec in TELEMETRY_REGISTERS.iter().chain(MOVE_REGISTERS.iter()) {
                self.bus.register_read(id, *spec);
            }
        }

        // Homing offset and operating mode live in EEPROM: torque must be off
        self.bus.set_torque(&self.ids, false)?;
        for actuator in &self.actuators {
            if let Some(homing) = actuator.homing_offset {
                debug!("Writing homing offset {} to actuator {}", homing, actuator.id);
                self.bus.write_register(actuator.id, HOMING_OFFSET, homing)?;
            }
        }
        self.mode.force(&mut self.bus, &self.ids, ControlMode::Current)?;

        self.bus.set_torque(&self.ids, true)?;
        self.torque_enabled = true;

        info!("Initialization complete");
        Ok(())
    }

    /// Torque off, then close the transport. Runs on every loop exit.
    pub fn shutdown(&mut self) {
        info!("Shutting down: disabling torque");
        if let Err(e) = self.bus.set_torque(&self.ids, false) {
            error!("Failed to disable torque on shutdown: {}", e);
        }
        self.torque_enabled = false;
        self.bus.transport_mut().close();
        self.active = false;
    }

    pub fn mode(&self) -> ControlMode {
        self.mode.current()
    }

    pub fn mode_transitions(&self) -> usize {
        self.mode.transitions()
    }

    pub fn safety(&self) -> &SafetyMonitor {
        &self.safety
    }

    pub fn bus(&self) -> &BusTransactionManager<T> {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut BusTransactionManager<T> {
        &mut self.bus
    }

    pub fn torque_enabled(&self) -> bool {
        self.torque_enabled
    }

    /// Whether the transport is open and still needs a shutdown
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn move_state(&self) -> &MoveState {
        &self.motion
    }

    /// Last measured positions in radians (zero before the first sample)
    pub fn last_positions(&self) -> [f64; 2] {
        self.last_positions.unwrap_or_default().map(rad_from_ticks)
    }

    /// Velocity command (rad/s per actuator)
    pub fn set_velocity(&mut self, values: [f64; 2]) -> Result<(), DriverError> {
        self.supersede_move();
        self.switch_mode(ControlMode::Velocity)?;

        let goals = self.pair(values.map(ticks_from_rad_s));
        self.bus.write_batch(GOAL_VELOCITY, &goals)?;
        self.rearm()
    }

    /// Current/torque command (N·m per actuator)
    pub fn set_current(&mut self, values: [f64; 2]) -> Result<(), DriverError> {
        self.supersede_move();
        self.switch_mode(ControlMode::Current)?;

        let goals = self.pair(values.map(|v| ticks_from_torque(v) as i32));
        self.bus.write_batch(GOAL_CURRENT, &goals)?;
        self.rearm()
    }

    /// Start a move to `targets` (radians).
    ///
    /// Returns `Some` when the request finishes immediately: an unsafe target
    /// (nothing written) or a move already in flight. Otherwise the move is
    /// advanced by subsequent position samples; see [`take_finished`](Self::take_finished).
    pub fn begin_move(&mut self, targets: [f64; 2]) -> Result<Option<MoveResult>, DriverError> {
        if self.motion.is_active() {
            warn!("Move already in progress, rejecting new target {:?}", targets);
            return Ok(Some(self.result(MoveOutcome::Aborted)));
        }

        let corrected = targets.map(ticks_from_rad);
        if let Err(e) = self.safety.check(corrected) {
            warn!("Target position out of range: {}", e);
            self.last_positions = Some(self.read_positions()?);
            return Ok(Some(self.result(MoveOutcome::Aborted)));
        }

        self.switch_mode(ControlMode::Position)?;

        let target = [
            raw_position(corrected[0], self.actuators[0].position_offset),
            raw_position(corrected[1], self.actuators[1].position_offset),
        ];
        let goals = self.pair(target);
        self.bus.write_batch(GOAL_POSITION, &goals)?;
        self.rearm()?;

        info!("Moving to {:?} (raw {:?})", targets, target);
        self.motion = MoveState::Commanded { target };
        Ok(None)
    }

    /// Hand over the result of a finished move, returning the machine to idle
    pub fn take_finished(&mut self) -> Option<MoveResult> {
        let result = self.motion.result()?;
        self.motion = MoveState::Idle;
        Some(result)
    }

    /// Blocking move: start, then sample positions until converged, aborted
    /// or timed out. Communication failures end the move and propagate.
    pub fn move_to(&mut self, targets: [f64; 2]) -> Result<MoveResult, DriverError> {
        if let Some(result) = self.begin_move(targets)? {
            return Ok(result);
        }
        loop {
            let sample = self.read_positions().and_then(|p| self.observe(p));
            if let Err(e) = sample {
                self.motion = MoveState::Idle;
                return Err(e);
            }
            if let Some(result) = self.take_finished() {
                return Ok(result);
            }
        }
    }

    /// One telemetry cycle: single bulk read of position, velocity and current,
    /// safety check (emergency stop on violation), move progress.
    pub fn poll(&mut self) -> Result<Telemetry, DriverError> {
        self.bus.read_batch(&TELEMETRY_REGISTERS, &self.ids)?;

        let mut position = [0; 2];
        let mut velocity = [0; 2];
        let mut current = [0; 2];
        for (i, actuator) in self.actuators.iter().enumerate() {
            let raw = self.bus.get(actuator.id, PRESENT_POSITION)?;
            position[i] = corrected_position(raw, actuator.position_offset);
            velocity[i] = self.bus.get(actuator.id, PRESENT_VELOCITY)?;
            current[i] = self.bus.get(actuator.id, PRESENT_CURRENT)?;
        }

        let safe = self.observe(position)?;

        Ok(Telemetry {
            position: position.map(rad_from_ticks),
            velocity: velocity.map(rad_s_from_ticks),
            torque: current.map(|c| torque_from_ticks(c as i16)),
            safe,
        })
    }

    fn pair(&self, values: [i32; 2]) -> [(u8, i32); 2] {
        [(self.ids[0], values[0]), (self.ids[1], values[1])]
    }

    fn result(&self, outcome: MoveOutcome) -> MoveResult {
        MoveResult {
            outcome,
            positions: self.last_positions(),
        }
    }

    /// Mode-switch rejections are reported, not fatal; bus failures are
    fn switch_mode(&mut self, mode: ControlMode) -> Result<(), DriverError> {
        match self.mode.ensure_mode(&mut self.bus, &self.ids, mode) {
            Ok(switched) => {
                if switched {
                    self.torque_enabled = true;
                }
                Ok(())
            }
            Err(e @ DriverError::ModeSwitch { .. }) => {
                self.torque_enabled = true;
                warn!("{}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Re-enable torque after an emergency stop; a new command re-arms
    fn rearm(&mut self) -> Result<(), DriverError> {
        if !self.torque_enabled {
            info!("Re-enabling torque");
            self.bus.set_torque(&self.ids, true)?;
            self.torque_enabled = true;
        }
        Ok(())
    }

    fn supersede_move(&mut self) {
        if self.motion.is_active() {
            info!("Move superseded by a new command");
            self.motion = MoveState::Aborted(self.result(MoveOutcome::Aborted));
        }
    }

    /// Offset-corrected present positions, from a fresh round-trip
    fn read_positions(&mut self) -> Result<[i32; 2], DriverError> {
        self.bus.read_batch(&MOVE_REGISTERS, &self.ids)?;
        let raw = [
            self.bus.get(self.ids[0], PRESENT_POSITION)?,
            self.bus.get(self.ids[1], PRESENT_POSITION)?,
        ];
        Ok([
            corrected_position(raw[0], self.actuators[0].position_offset),
            corrected_position(raw[1], self.actuators[1].position_offset),
        ])
    }

    /// Feed one position sample through the safety check and the move machine.
    /// Returns whether the sample was inside the safe zone.
    fn observe(&mut self, corrected: [i32; 2]) -> Result<bool, DriverError> {
        self.last_positions = Some(corrected);

        let violation = self.safety.check(corrected).err();
        if let Some(ref e) = violation {
            warn!("{}", e);
            self.torque_enabled = false;
            self.safety.emergency_stop(&mut self.bus)?;
        }

        let target = match self.motion {
            MoveState::Commanded { target } => {
                self.motion = MoveState::Converging { target, cycles: 0 };
                target
            }
            MoveState::Converging { target, .. } => target,
            _ => return Ok(violation.is_none()),
        };

        if violation.is_some() {
            self.motion = MoveState::Aborted(self.result(MoveOutcome::Aborted));
        } else if self.converged(target, corrected) {
            info!("Move converged at {:?}", corrected);
            self.motion = MoveState::Converged(self.result(MoveOutcome::Converged));
        } else if let MoveState::Converging { cycles, .. } = &mut self.motion {
            *cycles += 1;
            if *cycles >= self.move_timeout_cycles {
                warn!("Move timed out after {} cycles at {:?}", cycles, corrected);
                self.motion = MoveState::TimedOut(self.result(MoveOutcome::TimedOut));
            }
        }
        Ok(violation.is_none())
    }

    fn converged(&self, target: [i32; 2], corrected: [i32; 2]) -> bool {
        self.actuators
            .iter()
            .zip(target.iter().zip(corrected))
            .all(|(actuator, (&goal, position))| {
                let raw = position as i64 + actuator.position_offset as i64;
                (goal as i64 - raw).abs() <= self.convergence_threshold as i64
            })
    }
}

impl<T: BusTransport> Drop for Coordinator<T> {
    fn drop(&mut self) {
        // Leave the arm limp and the port closed if the owner forgot to shut down
        if self.active {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::motor::registers::OPERATING_MODE;
    use crate::motor::sim::{BusWrite, SimulatedBus};
    use crate::motor::transport::{BulkReadData, BulkReadParam, CommError, CommResult};

    /// Simulated bus that reports `close` through a shared flag, so it can
    /// be observed after the coordinator is dropped
    struct CloseWatch {
        inner: SimulatedBus,
        closed: Rc<Cell<bool>>,
    }

    impl BusTransport for CloseWatch {
        fn open(&mut self) -> CommResult<()> {
            self.inner.open()
        }

        fn set_baud_rate(&mut self, baud_rate: u32) -> CommResult<()> {
            self.inner.set_baud_rate(baud_rate)
        }

        fn close(&mut self) {
            self.closed.set(true);
            self.inner.close();
        }

        fn write_register(&mut self, id: u8, address: u16, data: &[u8]) -> CommResult<()> {
            self.inner.write_register(id, address, data)
        }

        fn sync_write(&mut self, address: u16, width: u16, data: &[(u8, Vec<u8>)]) -> CommResult<()> {
            self.inner.sync_write(address, width, data)
        }

        fn bulk_read(&mut self, params: &[BulkReadParam]) -> CommResult<BulkReadData> {
            self.inner.bulk_read(params)
        }
    }

    fn coordinator(step: i32) -> Coordinator<SimulatedBus> {
        let config = DriverConfig::default();
        let mut bus = SimulatedBus::new(&config.actuator_ids()).with_step(step);
        // Both arms resting at their home pose
        bus.set_raw_position(1, config.actuators[0].position_offset);
        bus.set_raw_position(2, config.actuators[1].position_offset);
        let mut coordinator = Coordinator::new(bus, &config);
        coordinator.init().unwrap();
        coordinator.bus_mut().transport_mut().clear_log();
        coordinator
    }

    fn sync_writes(c: &Coordinator<SimulatedBus>) -> Vec<(u16, Vec<(u8, Vec<u8>)>)> {
        c.bus()
            .transport()
            .writes()
            .iter()
            .filter_map(|w| match w {
                BusWrite::Sync { address, data } => Some((*address, data.clone())),
                BusWrite::Register { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_init_sequence() {
        let config = DriverConfig::default();
        let mut c = Coordinator::new(SimulatedBus::new(&[1, 2]), &config);
        c.init().unwrap();

        let bus = c.bus().transport();
        assert!(bus.is_open());
        assert_eq!(bus.baud_rate(), config.baud_rate);
        assert!(bus.torque_enabled(1) && bus.torque_enabled(2));
        assert_eq!(bus.raw_register(1, HOMING_OFFSET), Some(1024));
        assert_eq!(c.mode(), ControlMode::Current);
        assert_eq!(c.mode_transitions(), 0);
        for id in [1, 2] {
            for spec in TELEMETRY_REGISTERS {
                assert!(c.bus().is_registered(id, spec));
            }
        }
    }

    #[test]
    fn test_init_fails_when_actuator_missing() {
        let mut c = Coordinator::new(SimulatedBus::new(&[1]), &DriverConfig::default());
        assert!(matches!(c.init(), Err(DriverError::BusComm(_))));
    }

    #[test]
    fn test_set_velocity_switches_mode_once() {
        let mut c = coordinator(20);
        c.set_velocity([1.0, -0.5]).unwrap();
        c.set_velocity([0.2, 0.2]).unwrap();

        assert_eq!(c.mode(), ControlMode::Velocity);
        assert_eq!(c.mode_transitions(), 1);
        let writes = sync_writes(&c);
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].0, GOAL_VELOCITY.address);
        let expected = ticks_from_rad_s(1.0);
        assert_eq!(writes[0].1[0], (1, expected.to_le_bytes().to_vec()));
    }

    #[test]
    fn test_set_current_in_current_mode_needs_no_bracket() {
        let mut c = coordinator(20);
        c.set_current([0.1, -0.1]).unwrap();

        assert_eq!(c.mode_transitions(), 0);
        assert_eq!(c.bus().transport().round_trips(), 1);
        let writes = sync_writes(&c);
        assert_eq!(writes[0].0, GOAL_CURRENT.address);
        assert_eq!(writes[0].1[1].1.len(), 2);
    }

    #[test]
    fn test_poll_reports_home_pose() {
        let mut c = coordinator(20);
        let telemetry = c.poll().unwrap();
        assert!(telemetry.safe);
        assert_eq!(telemetry.position, [0.0, 0.0]);
        assert_eq!(telemetry.velocity, [0.0, 0.0]);
        assert_eq!(c.bus().transport().round_trips(), 1);
    }

    #[test]
    fn test_poll_outside_zone_triggers_emergency_stop() {
        let mut c = coordinator(20);
        // Actuator 1 pushed past safe_max (1150) by hand
        c.bus_mut().transport_mut().set_raw_position(1, 2365 + 1300);

        let telemetry = c.poll().unwrap();
        assert!(!telemetry.safe);
        assert_eq!(c.safety().stops(), 1);
        assert!(!c.bus().transport().torque_enabled(1));
        assert!(!c.bus().transport().torque_enabled(2));

        // Not sticky: the next command re-arms torque
        c.set_current([0.0, 0.0]).unwrap();
        assert!(c.bus().transport().torque_enabled(1));
    }

    #[test]
    fn test_poll_read_failure_is_bus_error() {
        let mut c = coordinator(20);
        c.bus_mut()
            .transport_mut()
            .fail_next_read(CommError::RxFail("timeout".to_string()));
        let err = c.poll().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_move_converges_within_threshold() {
        let mut c = coordinator(20);
        let target = [0.5, -0.25];
        let result = c.move_to(target).unwrap();

        assert_eq!(result.outcome, MoveOutcome::Converged);
        for (i, &goal) in target.iter().enumerate() {
            let error = (ticks_from_rad(goal) - ticks_from_rad(result.positions[i])).abs();
            assert!(error <= 25, "actuator {} error {}", i, error);
        }
        assert_eq!(c.mode(), ControlMode::Position);
        assert_eq!(*c.move_state(), MoveState::Idle);
    }

    #[test]
    fn test_move_does_not_return_early() {
        let mut c = coordinator(20);
        // 0.5 rad = 326 ticks; at 20 ticks per sample the error is 26 after
        // 15 samples and 6 after 16
        c.move_to([0.5, 0.0]).unwrap();
        let reads = c
            .bus()
            .transport()
            .round_trips()
            - sync_writes(&c).len()
            - c.bus()
                .transport()
                .writes()
                .iter()
                .filter(|w| matches!(w, BusWrite::Register { .. }))
                .count();
        assert_eq!(reads, 16);
    }

    #[test]
    fn test_unsafe_target_aborts_without_writing() {
        let mut c = coordinator(20);
        // safe_max for actuator 1 is 1150 ticks (~1.76 rad)
        let result = c.move_to([2.0, 0.0]).unwrap();

        assert_eq!(result.outcome, MoveOutcome::Aborted);
        assert_eq!(result.positions, [0.0, 0.0]);
        assert!(c.bus().transport().writes().is_empty());
        assert_eq!(c.mode(), ControlMode::Current);
    }

    #[test]
    fn test_move_times_out() {
        let mut config = DriverConfig::default();
        config.move_timeout_cycles = 5;
        let mut bus = SimulatedBus::new(&[1, 2]).with_step(0);
        bus.set_raw_position(1, config.actuators[0].position_offset);
        bus.set_raw_position(2, config.actuators[1].position_offset);
        let mut c = Coordinator::new(bus, &config);
        c.init().unwrap();

        let result = c.move_to([0.5, 0.5]).unwrap();
        assert_eq!(result.outcome, MoveOutcome::TimedOut);
    }

    #[test]
    fn test_move_aborts_when_arm_leaves_zone() {
        let mut c = coordinator(20);
        c.begin_move([1.0, 0.0]).unwrap();
        c.bus_mut().transport_mut().set_raw_position(2, 1855 - 1500);

        let telemetry = c.poll().unwrap();
        assert!(!telemetry.safe);
        let result = c.take_finished().unwrap();
        assert_eq!(result.outcome, MoveOutcome::Aborted);
        assert_eq!(c.safety().stops(), 1);
    }

    #[test]
    fn test_poll_advances_pending_move() {
        let mut c = coordinator(50);
        assert!(c.begin_move([0.2, 0.2]).unwrap().is_none());
        assert!(matches!(c.move_state(), MoveState::Commanded { .. }));

        c.poll().unwrap();
        assert!(matches!(c.move_state(), MoveState::Converging { .. }));

        let mut polls = 1;
        while c.move_state().is_active() {
            c.poll().unwrap();
            polls += 1;
        }
        assert!(polls < 10);
        assert_eq!(c.take_finished().unwrap().outcome, MoveOutcome::Converged);
        assert!(c.take_finished().is_none());
    }

    #[test]
    fn test_second_move_is_rejected_while_busy() {
        let mut c = coordinator(20);
        c.begin_move([0.5, 0.0]).unwrap();
        let rejected = c.begin_move([0.1, 0.1]).unwrap().unwrap();
        assert_eq!(rejected.outcome, MoveOutcome::Aborted);
        assert!(c.move_state().is_active());
    }

    #[test]
    fn test_velocity_command_supersedes_move() {
        let mut c = coordinator(20);
        c.begin_move([0.5, 0.0]).unwrap();
        c.set_velocity([0.0, 0.0]).unwrap();
        assert_eq!(c.take_finished().unwrap().outcome, MoveOutcome::Aborted);
        assert_eq!(c.mode(), ControlMode::Velocity);
    }

    #[test]
    fn test_move_read_failure_propagates() {
        let mut c = coordinator(20);
        c.bus_mut()
            .transport_mut()
            .fail_next_read(CommError::RxFail("timeout".to_string()));
        let err = c.move_to([0.5, 0.0]).unwrap_err();
        assert!(matches!(err, DriverError::BusComm(_)));
        assert_eq!(*c.move_state(), MoveState::Idle);
    }

    #[test]
    fn test_shutdown_disables_torque_and_closes() {
        let mut c = coordinator(20);
        c.shutdown();
        assert!(!c.bus().transport().torque_enabled(1));
        assert!(!c.bus().transport().is_open());
        assert!(!c.torque_enabled());
    }

    #[test]
    fn test_poll_at_encoder_range_end_stops_safely() {
        let mut c = coordinator(20);
        c.bus_mut().transport_mut().set_raw_position(1, i32::MIN);

        let telemetry = c.poll().unwrap();
        assert!(!telemetry.safe);
        assert_eq!(c.safety().stops(), 1);
        assert!(!c.bus().transport().torque_enabled(1));
        assert!(telemetry.position[0] < 0.0);
    }

    #[test]
    fn test_move_aborts_when_position_reads_range_end() {
        let mut c = coordinator(20);
        c.begin_move([0.5, 0.0]).unwrap();
        c.bus_mut().transport_mut().set_raw_position(2, i32::MAX);

        assert!(!c.poll().unwrap().safe);
        assert_eq!(c.take_finished().unwrap().outcome, MoveOutcome::Aborted);
    }

    #[test]
    fn test_huge_velocity_command_polls_without_overflow() {
        let mut c = coordinator(20);
        c.set_velocity([1.0e12, 0.0]).unwrap();

        let first = c.poll().unwrap();
        assert!(!first.safe);
        let second = c.poll().unwrap();
        assert!(!second.safe);
        assert_eq!(c.bus().transport().raw_register(1, PRESENT_POSITION), Some(i32::MAX));
    }

    #[test]
    fn test_rejected_mode_switch_still_writes_goals() {
        let mut c = coordinator(20);
        c.bus_mut()
            .transport_mut()
            .reject_writes_to(OPERATING_MODE.address, 0x04);

        c.set_velocity([0.5, -0.5]).unwrap();

        assert_eq!(c.mode(), ControlMode::Velocity);
        assert!(c.torque_enabled());
        assert!(c.bus().transport().torque_enabled(1));
        let writes = sync_writes(&c);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, GOAL_VELOCITY.address);
        assert_eq!(
            writes[0].1[0],
            (1, ticks_from_rad_s(0.5).to_le_bytes().to_vec())
        );
    }

    #[test]
    fn test_shutdown_after_emergency_stop_closes_port() {
        let mut c = coordinator(20);
        c.bus_mut().transport_mut().set_raw_position(1, 2365 + 1300);
        c.poll().unwrap();
        assert!(!c.torque_enabled());
        assert!(c.is_active());

        c.shutdown();
        assert!(!c.is_active());
        assert!(!c.bus().transport().is_open());
    }

    #[test]
    fn test_drop_after_emergency_stop_closes_port() {
        let closed = Rc::new(Cell::new(false));
        let config = DriverConfig::default();
        let mut bus = SimulatedBus::new(&config.actuator_ids());
        bus.set_raw_position(1, 2365 + 1300);
        bus.set_raw_position(2, 1855);
        let transport = CloseWatch {
            inner: bus,
            closed: Rc::clone(&closed),
        };

        let mut c = Coordinator::new(transport, &config);
        c.init().unwrap();
        assert!(!c.poll().unwrap().safe);
        assert!(!c.torque_enabled());
        drop(c);

        assert!(closed.get());
    }

    #[test]
    fn test_drop_before_init_leaves_port_alone() {
        let closed = Rc::new(Cell::new(false));
        let transport = CloseWatch {
            inner: SimulatedBus::new(&[1, 2]),
            closed: Rc::clone(&closed),
        };
        drop(Coordinator::new(transport, &DriverConfig::default()));
        assert!(!closed.get());
    }
}
