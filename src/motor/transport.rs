// Bus transport contract shared by the serial implementation and the simulator
//
// Register values cross this boundary as little-endian byte strings of the
// register's width; interpretation (sign, units) happens above it.

use std::collections::HashMap;

/// Communication result codes of a single bus round-trip
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommError {
    #[error("transmit failed: {0}")]
    TxFail(String),

    #[error("receive failed: {0}")]
    RxFail(String),

    #[error("actuator {id} reported hardware status 0x{status:02X}")]
    Status { id: u8, status: u8 },
}

pub type CommResult<T> = std::result::Result<T, CommError>;

/// A register location and width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterSpec {
    pub address: u16,
    pub width: u16,
}

impl RegisterSpec {
    pub const fn new(address: u16, width: u16) -> Self {
        Self { address, width }
    }

    /// One past the last byte of the register
    pub fn end(&self) -> u16 {
        self.address + self.width
    }
}

/// One device's share of a bulk read: a contiguous byte span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkReadParam {
    pub id: u8,
    pub address: u16,
    pub length: u16,
}

/// Bytes returned by a bulk read, keyed by actuator id.
/// Each entry starts at the address requested for that actuator.
pub type BulkReadData = HashMap<u8, Vec<u8>>;

/// Typed register access over one shared half-duplex link.
///
/// Implementations must complete each call as exactly one bus round-trip
/// (sync write has no status phase but still counts as one).
pub trait BusTransport {
    fn open(&mut self) -> CommResult<()>;

    fn set_baud_rate(&mut self, baud_rate: u32) -> CommResult<()>;

    fn close(&mut self);

    /// Write one register on one actuator and wait for its status packet
    fn write_register(&mut self, id: u8, address: u16, data: &[u8]) -> CommResult<()>;

    /// Write the same register on several actuators in one packet
    fn sync_write(&mut self, address: u16, width: u16, data: &[(u8, Vec<u8>)]) -> CommResult<()>;

    /// Read a span per actuator in one instruction packet
    fn bulk_read(&mut self, params: &[BulkReadParam]) -> CommResult<BulkReadData>;
}

/// Encode the low `width` bytes of `value`, little-endian
pub fn encode_value(value: i32, width: u16) -> Vec<u8> {
    value.to_le_bytes()[..usize::from(width.min(4))].to_vec()
}

/// Decode `bytes` little-endian and sign-extend from its width
pub fn decode_signed(bytes: &[u8]) -> i32 {
    match bytes.len() {
        0 => 0,
        1 => bytes[0] as i8 as i32,
        2 => i16::from_le_bytes([bytes[0], bytes[1]]) as i32,
        3 => {
            let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]);
            ((raw << 8) as i32) >> 8
        }
        _ => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}
