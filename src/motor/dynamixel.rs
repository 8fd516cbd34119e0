// Dynamixel Protocol 2.0 serial implementation
//
// Packet format:
// [0xFF, 0xFF, 0xFD, 0x00, ID, LEN_L, LEN_H, Instruction, Params..., CRC_L, CRC_H]
// LEN counts instruction + params + CRC. Any FF FF FD inside the instruction/params
// region is stuffed with an extra 0xFD.

use serialport::{self, ClearBuffer, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

use super::transport::{BulkReadData, BulkReadParam, BusTransport, CommError, CommResult};

/// Default serial configuration
pub const DEFAULT_BAUDRATE: u32 = 57_600;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Packet header bytes (with reserved byte)
const HEADER: [u8; 4] = [0xFF, 0xFF, 0xFD, 0x00];

/// Broadcast ID for sync instructions
pub const BROADCAST_ID: u8 = 0xFE;

/// Instruction byte carried by every status packet
const STATUS_INSTRUCTION: u8 = 0x55;

/// Instruction set
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    SyncWrite = 0x83,
    BulkRead = 0x92,
}

/// Error types for Dynamixel communication
#[derive(Debug, thiserror::Error)]
pub enum DynamixelError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Port {0} is not open")]
    NotOpen(String),

    #[error("Invalid response from actuator {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("CRC mismatch for actuator {id}")]
    CrcMismatch { id: u8 },

    #[error("Actuator {id} returned error status: 0x{status:02X}")]
    MotorError { id: u8, status: u8 },

    #[error("Timeout waiting for response from actuator {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, DynamixelError>;

impl DynamixelError {
    /// Classify a failure on the receive side of a round-trip
    fn into_rx(self) -> CommError {
        match self {
            DynamixelError::MotorError { id, status } => CommError::Status { id, status },
            other => CommError::RxFail(other.to_string()),
        }
    }

    fn into_tx(self) -> CommError {
        CommError::TxFail(self.to_string())
    }
}

/// Dynamixel bus - handles serial communication with actuators
pub struct DynamixelBus {
    port_name: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl DynamixelBus {
    /// Describe a bus; nothing is opened until [`BusTransport::open`]
    pub fn new(port_name: &str) -> Self {
        Self::with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    pub fn with_baudrate(port_name: &str, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate,
            port: None,
        }
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        match self.port.as_mut() {
            Some(port) => Ok(port),
            None => Err(DynamixelError::NotOpen(self.port_name.clone())),
        }
    }

    /// CRC-16 (polynomial 0x8005, init 0) over everything before the CRC field
    fn crc16(data: &[u8]) -> u16 {
        let mut crc: u16 = 0;
        for &byte in data {
            crc ^= (byte as u16) << 8;
            for _ in 0..8 {
                crc = if crc & 0x8000 != 0 {
                    (crc << 1) ^ 0x8005
                } else {
                    crc << 1
                };
            }
        }
        crc
    }

    /// Insert 0xFD after every FF FF FD sequence
    fn stuff(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() + 4);
        for &byte in data {
            out.push(byte);
            let n = out.len();
            if n >= 3 && out[n - 3..] == [0xFF, 0xFF, 0xFD] {
                out.push(0xFD);
            }
        }
        out
    }

    /// Remove the 0xFD stuffed after every FF FF FD sequence
    fn unstuff(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());
        let mut i = 0;
        while i < data.len() {
            out.push(data[i]);
            let n = out.len();
            if n >= 3 && out[n - 3..] == [0xFF, 0xFF, 0xFD] && data.get(i + 1) == Some(&0xFD) {
                i += 1;
            }
            i += 1;
        }
        out
    }

    /// Build a packet with header, stuffed body and CRC
    fn build_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
        let mut body = Vec::with_capacity(params.len() + 1);
        body.push(instruction as u8);
        body.extend_from_slice(params);
        let body = Self::stuff(&body);

        let length = (body.len() + 2) as u16; // body + CRC
        let mut packet = Vec::with_capacity(HEADER.len() + 3 + body.len() + 2);
        packet.extend_from_slice(&HEADER);
        packet.push(id);
        packet.extend_from_slice(&length.to_le_bytes());
        packet.extend_from_slice(&body);

        let crc = Self::crc16(&packet);
        packet.extend_from_slice(&crc.to_le_bytes());
        packet
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        let port = self.port()?;
        // Drop any stale bytes from a previous, partially read reply
        port.clear(ClearBuffer::Input)?;
        port.write_all(packet)?;
        port.flush()?;
        Ok(())
    }

    /// Read one status packet and return its parameters
    fn read_status(&mut self, expected_id: u8) -> Result<Vec<u8>> {
        let port = self.port()?;

        let mut head = [0u8; 7];
        port.read_exact(&mut head).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                DynamixelError::Timeout { id: expected_id }
            } else {
                DynamixelError::Io(e)
            }
        })?;

        if head[..4] != HEADER {
            return Err(DynamixelError::InvalidResponse {
                id: expected_id,
                reason: format!("Invalid header: {:02X?}", &head[..4]),
            });
        }

        let id = head[4];
        let length = u16::from_le_bytes([head[5], head[6]]) as usize;
        if id != expected_id {
            return Err(DynamixelError::InvalidResponse {
                id: expected_id,
                reason: format!("ID mismatch: expected {}, got {}", expected_id, id),
            });
        }
        // instruction + error + CRC at minimum
        if length < 4 {
            return Err(DynamixelError::InvalidResponse {
                id,
                reason: format!("Length {} too short", length),
            });
        }

        let mut remaining = vec![0u8; length];
        port.read_exact(&mut remaining)?;

        let crc_at = length - 2;
        let mut crc_data = head.to_vec();
        crc_data.extend_from_slice(&remaining[..crc_at]);
        let received = u16::from_le_bytes([remaining[crc_at], remaining[crc_at + 1]]);
        if Self::crc16(&crc_data) != received {
            return Err(DynamixelError::CrcMismatch { id });
        }

        if remaining[0] != STATUS_INSTRUCTION {
            return Err(DynamixelError::InvalidResponse {
                id,
                reason: format!("Not a status packet: 0x{:02X}", remaining[0]),
            });
        }

        // Bit 7 is the hardware alert flag; the low bits carry the error number
        let error = remaining[1];
        if error & 0x80 != 0 {
            debug!("Actuator {} raised hardware alert", id);
        }
        if error & 0x7F != 0 {
            return Err(DynamixelError::MotorError { id, status: error });
        }

        Ok(Self::unstuff(&remaining[2..crc_at]))
    }

    /// Ping an actuator to check if it's connected
    pub fn ping(&mut self, id: u8) -> Result<bool> {
        let packet = Self::build_packet(id, Instruction::Ping, &[]);
        self.send_packet(&packet)?;

        match self.read_status(id) {
            Ok(_) => Ok(true),
            Err(DynamixelError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Read `length` bytes starting at `address` from one actuator
    pub fn read(&mut self, id: u8, address: u16, length: u16) -> Result<Vec<u8>> {
        let [a_lo, a_hi] = address.to_le_bytes();
        let [l_lo, l_hi] = length.to_le_bytes();
        let packet = Self::build_packet(id, Instruction::Read, &[a_lo, a_hi, l_lo, l_hi]);
        self.send_packet(&packet)?;

        let data = self.read_status(id)?;
        if data.len() < length as usize {
            return Err(DynamixelError::InvalidResponse {
                id,
                reason: format!("Expected {} bytes, got {}", length, data.len()),
            });
        }
        Ok(data)
    }
}

impl BusTransport for DynamixelBus {
    fn open(&mut self) -> CommResult<()> {
        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()
            .map_err(|e| DynamixelError::from(e).into_tx())?;
        debug!("Opened {} at {} baud", self.port_name, self.baud_rate);
        self.port = Some(port);
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> CommResult<()> {
        let port = self.port().map_err(DynamixelError::into_tx)?;
        port.set_baud_rate(baud_rate)
            .map_err(|e| DynamixelError::from(e).into_tx())?;
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Closed {}", self.port_name);
        }
    }

    fn write_register(&mut self, id: u8, address: u16, data: &[u8]) -> CommResult<()> {
        let mut params = address.to_le_bytes().to_vec();
        params.extend_from_slice(data);
        let packet = Self::build_packet(id, Instruction::Write, &params);
        debug!("Write to actuator {}: addr={}, data={:02X?}", id, address, data);
        self.send_packet(&packet).map_err(DynamixelError::into_tx)?;

        self.read_status(id).map_err(DynamixelError::into_rx)?;
        Ok(())
    }

    fn sync_write(&mut self, address: u16, width: u16, data: &[(u8, Vec<u8>)]) -> CommResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        // [addr_l, addr_h, len_l, len_h, id1, data1..., id2, data2..., ...]
        let mut params = address.to_le_bytes().to_vec();
        params.extend_from_slice(&width.to_le_bytes());
        for (id, bytes) in data {
            params.push(*id);
            params.extend_from_slice(bytes);
        }

        let packet = Self::build_packet(BROADCAST_ID, Instruction::SyncWrite, &params);
        debug!("Sync write to {} actuators: addr={}", data.len(), address);
        // Sync write has no status phase
        self.send_packet(&packet).map_err(DynamixelError::into_tx)
    }

    fn bulk_read(&mut self, params: &[BulkReadParam]) -> CommResult<BulkReadData> {
        let mut bytes = Vec::with_capacity(params.len() * 5);
        for param in params {
            bytes.push(param.id);
            bytes.extend_from_slice(&param.address.to_le_bytes());
            bytes.extend_from_slice(&param.length.to_le_bytes());
        }

        let packet = Self::build_packet(BROADCAST_ID, Instruction::BulkRead, &bytes);
        self.send_packet(&packet).map_err(DynamixelError::into_tx)?;

        // Devices answer in the order they were listed
        let mut result = BulkReadData::new();
        for param in params {
            let data = self.read_status(param.id).map_err(DynamixelError::into_rx)?;
            if data.len() < param.length as usize {
                return Err(CommError::RxFail(format!(
                    "actuator {} returned {} of {} bytes",
                    param.id,
                    data.len(),
                    param.length
                )));
            }
            result.insert(param.id, data);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc() {
        // Ping to ID 1 from the protocol manual: FF FF FD 00 01 03 00 01 | 19 4E
        let data = [0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x03, 0x00, 0x01];
        assert_eq!(DynamixelBus::crc16(&data), 0x4E19);
    }

    #[test]
    fn test_build_ping_packet() {
        let packet = DynamixelBus::build_packet(1, Instruction::Ping, &[]);
        assert_eq!(
            packet,
            vec![0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x03, 0x00, 0x01, 0x19, 0x4E]
        );
    }

    #[test]
    fn test_build_write_packet_length() {
        // Torque enable on ID 1: addr 64, value 1
        let packet = DynamixelBus::build_packet(1, Instruction::Write, &[64, 0, 1]);
        // Header (4) + ID (1) + Length (2) + Instruction (1) + Params (3) + CRC (2)
        assert_eq!(packet.len(), 13);
        assert_eq!(u16::from_le_bytes([packet[5], packet[6]]), 6);
        assert_eq!(packet[7], 0x03);
    }

    #[test]
    fn test_byte_stuffing() {
        let raw = [0x03, 0xFF, 0xFF, 0xFD, 0x10];
        let stuffed = DynamixelBus::stuff(&raw);
        assert_eq!(stuffed, vec![0x03, 0xFF, 0xFF, 0xFD, 0xFD, 0x10]);
        assert_eq!(DynamixelBus::unstuff(&stuffed), raw.to_vec());

        // No pattern, no change
        let plain = [0xFF, 0xFD, 0xFF];
        assert_eq!(DynamixelBus::stuff(&plain), plain.to_vec());
    }

    #[test]
    fn test_unopened_bus_fails_to_transmit() {
        let mut bus = DynamixelBus::new("/dev/does-not-exist");
        let result = bus.write_register(1, 64, &[0]);
        assert!(matches!(result, Err(CommError::TxFail(_))));
    }
}
