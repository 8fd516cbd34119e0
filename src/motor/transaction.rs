// Batched register transactions over the shared bus
//
// A write batch stages one value per actuator and goes out as a single sync
// write. A read batch covers every requested register for every requested
// actuator in a single bulk read; values are served from that round-trip only.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use super::registers::{TORQUE_ENABLE, TORQUE_OFF, TORQUE_ON};
use super::transport::{
    decode_signed, encode_value, BulkReadData, BulkReadParam, BusTransport, CommResult,
    RegisterSpec,
};
use crate::error::DriverError;

/// Owns the transport; every bus access goes through here
pub struct BusTransactionManager<T: BusTransport> {
    transport: T,
    /// Persistent read configuration: (actuator, register) pairs allowed in read batches
    registered: HashSet<(u8, RegisterSpec)>,
    /// Data of the last completed read batch, and the address each span starts at
    last_read: BulkReadData,
    span_start: HashMap<u8, u16>,
}

impl<T: BusTransport> BusTransactionManager<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            registered: HashSet::new(),
            last_read: BulkReadData::new(),
            span_start: HashMap::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Allow `spec` on actuator `id` in future read batches
    pub fn register_read(&mut self, id: u8, spec: RegisterSpec) {
        if self.registered.insert((id, spec)) {
            debug!("Registered actuator {} register {} for batched reads", id, spec.address);
        }
    }

    pub fn is_registered(&self, id: u8, spec: RegisterSpec) -> bool {
        self.registered.contains(&(id, spec))
    }

    /// Single-register write with status, outside any batch
    pub fn write_register(&mut self, id: u8, spec: RegisterSpec, value: i32) -> CommResult<()> {
        self.transport
            .write_register(id, spec.address, &encode_value(value, spec.width))
    }

    /// Torque enable/disable on each actuator. Every actuator is attempted;
    /// the first failure is returned.
    pub fn set_torque(&mut self, ids: &[u8], enabled: bool) -> CommResult<()> {
        let value = if enabled { TORQUE_ON } else { TORQUE_OFF };
        let mut first_error = None;
        for &id in ids {
            if let Err(e) = self.write_register(id, TORQUE_ENABLE, value) {
                warn!("Torque write to actuator {} failed: {}", id, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Write `spec` on every listed actuator in one round-trip
    pub fn write_batch(&mut self, spec: RegisterSpec, values: &[(u8, i32)]) -> Result<(), DriverError> {
        let staged: Vec<(u8, Vec<u8>)> = values
            .iter()
            .map(|&(id, value)| (id, encode_value(value, spec.width)))
            .collect();

        debug!("Write batch: addr={}, values={:?}", spec.address, values);
        self.transport
            .sync_write(spec.address, spec.width, &staged)
            .map_err(DriverError::BusComm)
    }

    /// Read every register in `specs` from every actuator in `ids` in one round-trip
    pub fn read_batch(&mut self, specs: &[RegisterSpec], ids: &[u8]) -> Result<(), DriverError> {
        for &id in ids {
            for &spec in specs {
                if !self.is_registered(id, spec) {
                    return Err(DriverError::Configuration(format!(
                        "actuator {} register {} not registered for batched reads",
                        id, spec.address
                    )));
                }
            }
        }

        // Previous results never outlive a new attempt
        self.last_read.clear();
        self.span_start.clear();

        let (Some(start), Some(end)) = (
            specs.iter().map(|s| s.address).min(),
            specs.iter().map(|s| s.end()).max(),
        ) else {
            return Ok(());
        };

        let params: Vec<BulkReadParam> = ids
            .iter()
            .map(|&id| BulkReadParam {
                id,
                address: start,
                length: end - start,
            })
            .collect();

        let data = self.transport.bulk_read(&params)?;
        for &id in ids {
            self.span_start.insert(id, start);
        }
        self.last_read = data;
        Ok(())
    }

    /// Raw (sign-extended) value of `spec` from the last completed read batch
    pub fn get(&self, id: u8, spec: RegisterSpec) -> Result<i32, DriverError> {
        let unavailable = DriverError::DataUnavailable {
            id,
            address: spec.address,
            width: spec.width,
        };

        let (Some(bytes), Some(&start)) = (self.last_read.get(&id), self.span_start.get(&id)) else {
            return Err(unavailable);
        };
        if spec.address < start {
            return Err(unavailable);
        }
        let offset = usize::from(spec.address - start);
        let end = offset + usize::from(spec.width);
        match bytes.get(offset..end) {
            Some(slice) => Ok(decode_signed(slice)),
            None => Err(unavailable),
        }
    }
}
