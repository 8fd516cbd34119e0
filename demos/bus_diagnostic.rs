// Bus diagnostic: READ-ONLY check that both actuators answer
//
// This tool does NOT write anything to the actuators - torque stays as it is.
// Use this first before running the driver against hardware.
//
// Usage: cargo run --example bus_diagnostic -- [port] [baud]
// Example: cargo run --example bus_diagnostic -- /dev/ttyUSB0 4000000

use dynamixel_zenoh_driver::config::{DriverConfig, BAUD_RATE, MOTOR_PORT};
use dynamixel_zenoh_driver::motor::registers::{
    OPERATING_MODE, PRESENT_CURRENT, PRESENT_POSITION, PRESENT_VELOCITY, TORQUE_ENABLE,
};
use dynamixel_zenoh_driver::motor::transport::{decode_signed, RegisterSpec};
use dynamixel_zenoh_driver::motor::units::{
    corrected_position, rad_from_ticks, rad_s_from_ticks, torque_from_ticks,
};
use dynamixel_zenoh_driver::motor::{BusTransport, DynamixelBus};

fn read(bus: &mut DynamixelBus, id: u8, spec: RegisterSpec) -> Result<i32, Box<dyn std::error::Error>> {
    let bytes = bus.read(id, spec.address, spec.width)?;
    Ok(decode_signed(&bytes[..usize::from(spec.width)]))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| MOTOR_PORT.to_string());
    let baud = std::env::args()
        .nth(2)
        .and_then(|b| b.parse().ok())
        .unwrap_or(BAUD_RATE);
    let config = DriverConfig::default();

    println!("Dynamixel bus diagnostic (read-only)");
    println!("Serial port: {} @ {} baud", port, baud);
    println!();

    let mut bus = DynamixelBus::with_baudrate(&port, baud);
    if let Err(e) = bus.open() {
        println!("  ✗ Failed to open serial port: {}", e);
        println!("  - Check the port path and permissions (dialout group)");
        return Err(e.into());
    }
    println!("  ✓ Serial port opened");
    println!();

    for actuator in &config.actuators {
        let id = actuator.id;
        match bus.ping(id) {
            Ok(true) => println!("Actuator {}: ✓ RESPONDING", id),
            Ok(false) => {
                println!("Actuator {}: ✗ NO RESPONSE", id);
                continue;
            }
            Err(e) => {
                println!("Actuator {}: ✗ ERROR: {}", id, e);
                continue;
            }
        }

        let position = read(&mut bus, id, PRESENT_POSITION)?;
        let corrected = corrected_position(position, actuator.position_offset);
        let in_zone = (actuator.safe_min..=actuator.safe_max).contains(&corrected);
        println!("  torque enable:    {}", read(&mut bus, id, TORQUE_ENABLE)?);
        println!("  operating mode:   {}", read(&mut bus, id, OPERATING_MODE)?);
        println!(
            "  position:         {} raw, {} corrected ({:.3} rad) {}",
            position,
            corrected,
            rad_from_ticks(corrected),
            if in_zone { "in safe zone" } else { "OUTSIDE SAFE ZONE" }
        );
        let velocity = read(&mut bus, id, PRESENT_VELOCITY)?;
        println!("  velocity:         {} ({:.3} rad/s)", velocity, rad_s_from_ticks(velocity));
        let current = read(&mut bus, id, PRESENT_CURRENT)?;
        println!("  current:          {} ({:.3} N·m)", current, torque_from_ticks(current as i16));
        println!();
    }

    bus.close();
    Ok(())
}
