use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dynamixel_zenoh_driver::config::DriverConfig;

/// Two-actuator Dynamixel bus driver exposed over zenoh
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON configuration file (defaults are built in)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial device, overrides the config file
    #[arg(long)]
    port: Option<String>,

    /// Run against the simulated bus instead of hardware
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();
    let mut config = match args.config {
        Some(path) => match DriverConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        },
        None => DriverConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.simulate {
        config.motor_enabled = false;
    }

    if let Err(e) = dynamixel_zenoh_driver::runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
