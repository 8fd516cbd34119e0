// Keyboard teleop: A/D joint 1, W/S joint 2, R/F speed, H move home, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const SPEEDS: [f64; 3] = [0.1, 0.3, 0.6]; // rad/s
const INPUT_TIMEOUT_MS: u64 = 100; // Zero velocities after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher("dynamixel/cmd/velocity").await?;

    info!("Controls: A/D=joint 1, W/S=joint 2, R/F=speed, H=home, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&session, &publisher).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    session: &zenoh::Session,
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;
    let mut velocities = [0.0f64; 2];
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    KeyCode::Char('a') if pressed => {
                        velocities[0] = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        velocities[0] = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('w') if pressed => {
                        velocities[1] = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        velocities[1] = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    // Blocking move back to the home pose
                    KeyCode::Char('h') if pressed => move_home(session).await?,

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            velocities = [0.0, 0.0];
        }

        // Always publish at ~50Hz
        let cmd = json!({ "values": velocities });
        publisher.put(cmd.to_string()).await?;
    }

    Ok(())
}

async fn move_home(session: &zenoh::Session) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Moving home...");
    let request = json!({ "positions": [0.0, 0.0] }).to_string();
    let replies = session
        .get("dynamixel/srv/move")
        .payload(request)
        .timeout(Duration::from_secs(10))
        .await?;
    while let Ok(reply) = replies.recv_async().await {
        match reply.result() {
            Ok(sample) => info!("Move reply: {}", String::from_utf8_lossy(&sample.payload().to_bytes())),
            Err(err) => warn!("Move failed: {}", String::from_utf8_lossy(&err.payload().to_bytes())),
        }
    }
    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}
