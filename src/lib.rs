pub mod config;
pub mod error;
pub mod messages;
pub mod motor;
pub mod runtime;

pub use error::DriverError;
