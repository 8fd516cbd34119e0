// In-memory bus for running without hardware
//
// Each actuator is a byte-addressed control table. Writes land in the table,
// bulk reads copy out of it. In position mode with torque on, every bulk read
// first steps present position toward goal position, which is enough to
// exercise move convergence.

use std::collections::{BTreeMap, VecDeque};

use tracing::debug;

use super::registers::{
    CONTROL_TABLE_SIZE, GOAL_CURRENT, GOAL_POSITION, GOAL_VELOCITY, OPERATING_MODE,
    PRESENT_CURRENT, PRESENT_POSITION, PRESENT_VELOCITY, TORQUE_ENABLE,
};
use super::mode::ControlMode;
use super::transport::{
    decode_signed, encode_value, BulkReadData, BulkReadParam, BusTransport, CommError, CommResult,
    RegisterSpec,
};

/// Default position step per bulk read (ticks)
pub const DEFAULT_STEP: i32 = 20;

/// A write observed by the simulator, for inspection in tests and logs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusWrite {
    Register { id: u8, address: u16, data: Vec<u8> },
    Sync { address: u16, data: Vec<(u8, Vec<u8>)> },
}

/// Simulated Dynamixel bus
pub struct SimulatedBus {
    tables: BTreeMap<u8, Vec<u8>>,
    step: i32,
    open: bool,
    baud_rate: u32,
    round_trips: usize,
    writes: Vec<BusWrite>,
    read_failures: VecDeque<CommError>,
    rejected_addresses: Vec<(u16, u8)>,
}

impl SimulatedBus {
    /// Create a bus with the given actuators, all at raw position 0
    pub fn new(ids: &[u8]) -> Self {
        let tables = ids
            .iter()
            .map(|&id| (id, vec![0u8; CONTROL_TABLE_SIZE]))
            .collect();
        Self {
            tables,
            step: DEFAULT_STEP,
            open: false,
            baud_rate: 0,
            round_trips: 0,
            writes: Vec::new(),
            read_failures: VecDeque::new(),
            rejected_addresses: Vec::new(),
        }
    }

    /// Set how far present position moves toward goal on each bulk read
    pub fn with_step(mut self, step: i32) -> Self {
        self.step = step.max(0);
        self
    }

    /// Place an actuator at a raw position (also its goal, so it stays put)
    pub fn set_raw_position(&mut self, id: u8, ticks: i32) {
        self.store(id, PRESENT_POSITION, ticks);
        self.store(id, GOAL_POSITION, ticks);
    }

    pub fn raw_register(&self, id: u8, spec: RegisterSpec) -> Option<i32> {
        let table = self.tables.get(&id)?;
        let start = usize::from(spec.address);
        Some(decode_signed(&table[start..start + usize::from(spec.width)]))
    }

    pub fn torque_enabled(&self, id: u8) -> bool {
        self.raw_register(id, TORQUE_ENABLE) == Some(1)
    }

    pub fn round_trips(&self) -> usize {
        self.round_trips
    }

    pub fn writes(&self) -> &[BusWrite] {
        &self.writes
    }

    pub fn clear_log(&mut self) {
        self.writes.clear();
        self.round_trips = 0;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Make the next bulk read fail with `error`
    pub fn fail_next_read(&mut self, error: CommError) {
        self.read_failures.push_back(error);
    }

    /// Reject every single-register write to `address` with a hardware status
    pub fn reject_writes_to(&mut self, address: u16, status: u8) {
        self.rejected_addresses.push((address, status));
    }

    fn store(&mut self, id: u8, spec: RegisterSpec, value: i32) {
        if let Some(table) = self.tables.get_mut(&id) {
            let start = usize::from(spec.address);
            let bytes = encode_value(value, spec.width);
            table[start..start + bytes.len()].copy_from_slice(&bytes);
        }
    }

    fn write_bytes(&mut self, id: u8, address: u16, data: &[u8]) -> CommResult<()> {
        let table = self
            .tables
            .get_mut(&id)
            .ok_or_else(|| CommError::RxFail(format!("no status from actuator {}", id)))?;
        let start = usize::from(address);
        let end = start + data.len();
        if end > table.len() {
            return Err(CommError::Status { id, status: 0x07 }); // data range error
        }
        table[start..end].copy_from_slice(data);
        Ok(())
    }

    /// Advance the physics by one step for every actuator
    fn advance(&mut self) {
        let ids: Vec<u8> = self.tables.keys().copied().collect();
        for id in ids {
            let torque = self.torque_enabled(id);
            let mode = self.raw_register(id, OPERATING_MODE).unwrap_or_default();
            let present = self.raw_register(id, PRESENT_POSITION).unwrap_or_default();

            let (position, velocity, current) = if !torque {
                (present, 0, 0)
            } else if mode == ControlMode::Position.register_value() as i32 {
                let goal = self.raw_register(id, GOAL_POSITION).unwrap_or_default();
                let delta = goal.saturating_sub(present).clamp(-self.step, self.step);
                (present.saturating_add(delta), delta, 0)
            } else if mode == ControlMode::Velocity.register_value() as i32 {
                let goal = self.raw_register(id, GOAL_VELOCITY).unwrap_or_default();
                (present.saturating_add(goal), goal, 0)
            } else {
                let goal = self.raw_register(id, GOAL_CURRENT).unwrap_or_default();
                (present, 0, goal)
            };

            self.store(id, PRESENT_POSITION, position);
            self.store(id, PRESENT_VELOCITY, velocity);
            self.store(id, PRESENT_CURRENT, current);
        }
    }
}

impl BusTransport for SimulatedBus {
    fn open(&mut self) -> CommResult<()> {
        self.open = true;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> CommResult<()> {
        if !self.open {
            return Err(CommError::TxFail("port not open".to_string()));
        }
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn write_register(&mut self, id: u8, address: u16, data: &[u8]) -> CommResult<()> {
        self.round_trips += 1;
        self.writes.push(BusWrite::Register {
            id,
            address,
            data: data.to_vec(),
        });
        if let Some(&(_, status)) = self.rejected_addresses.iter().find(|(a, _)| *a == address) {
            return Err(CommError::Status { id, status });
        }
        self.write_bytes(id, address, data)
    }

    fn sync_write(&mut self, address: u16, width: u16, data: &[(u8, Vec<u8>)]) -> CommResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.round_trips += 1;
        self.writes.push(BusWrite::Sync {
            address,
            data: data.to_vec(),
        });
        debug!("Simulated sync write of {} bytes to {} actuators", width, data.len());
        for (id, bytes) in data {
            // Broadcast: absent actuators simply don't listen
            if self.tables.contains_key(id) {
                self.write_bytes(*id, address, bytes)?;
            }
        }
        Ok(())
    }

    fn bulk_read(&mut self, params: &[BulkReadParam]) -> CommResult<BulkReadData> {
        self.round_trips += 1;
        if let Some(error) = self.read_failures.pop_front() {
            return Err(error);
        }
        self.advance();

        let mut result = BulkReadData::new();
        for param in params {
            let table = self
                .tables
                .get(&param.id)
                .ok_or_else(|| CommError::RxFail(format!("no status from actuator {}", param.id)))?;
            let start = usize::from(param.address);
            let end = start + usize::from(param.length);
            if end > table.len() {
                return Err(CommError::Status {
                    id: param.id,
                    status: 0x07,
                });
            }
            result.insert(param.id, table[start..end].to_vec());
        }
        Ok(result)
    }
}
