// Actuator bus for the two-joint Dynamixel arm
//
// Provides:
// - Unit conversion between register ticks and physical units
// - Dynamixel Protocol 2.0 serial transport (and an in-memory simulator)
// - Batched bus transactions, control-mode switching, safety envelope
// - The coordinator tying them together

pub mod driver;
pub mod dynamixel;
pub mod mode;
pub mod registers;
pub mod safety;
pub mod sim;
pub mod transaction;
pub mod transport;
pub mod units;

pub use driver::{Coordinator, MoveResult, MoveState, Telemetry};
pub use dynamixel::{DynamixelBus, DynamixelError};
pub use mode::ControlMode;
pub use sim::SimulatedBus;
pub use transport::{BusTransport, CommError};
