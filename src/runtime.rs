// 50 Hz loop: commands in, one telemetry poll, telemetry out
//
// All bus traffic happens on this task, one transaction at a time. Moves are
// not awaited inline: a move request starts the move and is answered on the
// tick where the coordinator reports it finished, so telemetry keeps flowing.

use tokio::time::interval;
use tracing::{error, info, warn};
use zenoh::query::Query;

use crate::config::{
    DriverConfig, TOPIC_CMD_TORQUE, TOPIC_CMD_VELOCITY, TOPIC_HEALTH, TOPIC_SRV_MOVE,
    TOPIC_STATE_POSITION, TOPIC_STATE_TORQUE, TOPIC_STATE_VELOCITY,
};
use crate::error::DriverError;
use crate::messages::{JointCommand, JointState, MoveRequest, MoveResponse, RuntimeHealth};
use crate::motor::{BusTransport, Coordinator, DynamixelBus, MoveResult, SimulatedBus};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub async fn run(config: DriverConfig) -> Result<(), BoxError> {
    config.validate()?;

    if config.motor_enabled {
        let bus = DynamixelBus::with_baudrate(&config.port, config.baud_rate);
        drive(Coordinator::new(bus, &config), &config).await
    } else {
        info!("Motor control disabled, using simulated bus");
        let mut bus = SimulatedBus::new(&config.actuator_ids());
        for actuator in &config.actuators {
            bus.set_raw_position(actuator.id, actuator.position_offset);
        }
        drive(Coordinator::new(bus, &config), &config).await
    }
}

/// Bring the bus up, serve until a fatal error, and always shut down
async fn drive<T: BusTransport>(
    mut coordinator: Coordinator<T>,
    config: &DriverConfig,
) -> Result<(), BoxError> {
    coordinator.init()?;

    let result = serve(&mut coordinator, config).await;
    if let Err(ref e) = result {
        error!("Run loop terminated: {}", e);
    }
    coordinator.shutdown();
    result
}

async fn serve<T: BusTransport>(
    coordinator: &mut Coordinator<T>,
    config: &DriverConfig,
) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers, subscribers and move service...");
    let sub_velocity = session.declare_subscriber(TOPIC_CMD_VELOCITY).await?;
    let sub_torque = session.declare_subscriber(TOPIC_CMD_TORQUE).await?;
    let move_service = session.declare_queryable(TOPIC_SRV_MOVE).await?;
    let pub_position = session.declare_publisher(TOPIC_STATE_POSITION).await?;
    let pub_velocity = session.declare_publisher(TOPIC_STATE_VELOCITY).await?;
    let pub_torque = session.declare_publisher(TOPIC_STATE_TORQUE).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut tick = interval(config.poll_period());
    let mut pending_move: Option<Query> = None;

    info!(
        "Runtime started: {}Hz loop, convergence within {} ticks",
        config.loop_hz, config.convergence_threshold
    );
    info!("Subscribed to: {}, {}", TOPIC_CMD_VELOCITY, TOPIC_CMD_TORQUE);
    info!("Serving: {}", TOPIC_SRV_MOVE);
    info!(
        "Publishing to: {}, {}, {}, {}",
        TOPIC_STATE_POSITION, TOPIC_STATE_VELOCITY, TOPIC_STATE_TORQUE, TOPIC_HEALTH
    );

    loop {
        tick.tick().await;

        // 1. Drain pending velocity/torque commands in arrival order
        while let Ok(Some(sample)) = sub_velocity.try_recv() {
            if let Some(cmd) = parse_command(&sample.payload().to_bytes()) {
                handle(coordinator.set_velocity(cmd.values))?;
            }
        }
        while let Ok(Some(sample)) = sub_torque.try_recv() {
            if let Some(cmd) = parse_command(&sample.payload().to_bytes()) {
                handle(coordinator.set_current(cmd.values))?;
            }
        }
        // A command may have superseded the move in flight
        answer_finished(coordinator, &mut pending_move).await;

        // 2. Start moves; immediate outcomes are answered right away
        while let Ok(Some(query)) = move_service.try_recv() {
            let payload = query.payload().map(|p| p.to_bytes().into_owned());
            let request = match payload.as_deref().map(serde_json::from_slice::<MoveRequest>) {
                Some(Ok(request)) => request,
                Some(Err(e)) => {
                    warn!("Failed to parse move request: {}", e);
                    reply_error(&query, &e.to_string()).await;
                    continue;
                }
                None => {
                    warn!("Move request without payload");
                    reply_error(&query, "missing payload").await;
                    continue;
                }
            };

            match coordinator.begin_move(request.positions) {
                Ok(Some(result)) => reply(&query, result).await,
                Ok(None) => pending_move = Some(query),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!("Move request failed: {}", e);
                    reply_error(&query, &e.to_string()).await;
                }
            }
        }

        // 3. Telemetry poll (also advances the move); bus failure ends the loop
        let telemetry = coordinator.poll()?;
        answer_finished(coordinator, &mut pending_move).await;

        // 4. Publish telemetry and health
        publish(&pub_position, telemetry.position).await?;
        publish(&pub_velocity, telemetry.velocity).await?;
        publish(&pub_torque, telemetry.torque).await?;

        let health = if telemetry.safe {
            RuntimeHealth::Ok
        } else {
            RuntimeHealth::SafetyStop
        };
        pub_health.put(serde_json::to_string(&health)?).await?;
    }
}

fn parse_command(payload: &[u8]) -> Option<JointCommand> {
    match serde_json::from_slice::<JointCommand>(payload) {
        Ok(cmd) => Some(cmd),
        Err(e) => {
            warn!("Failed to parse command: {}", e);
            None
        }
    }
}

/// Non-fatal command errors are logged; fatal ones end the loop
fn handle(result: Result<(), DriverError>) -> Result<(), DriverError> {
    match result {
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!("Command failed: {}", e);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

async fn publish(
    publisher: &zenoh::pubsub::Publisher<'_>,
    values: [f64; 2],
) -> Result<(), BoxError> {
    let json = serde_json::to_string(&JointState { values })?;
    publisher.put(json).await?;
    Ok(())
}

async fn answer_finished<T: BusTransport>(
    coordinator: &mut Coordinator<T>,
    pending_move: &mut Option<Query>,
) {
    if let Some(result) = coordinator.take_finished() {
        match pending_move.take() {
            Some(query) => reply(&query, result).await,
            None => warn!("Move finished with no caller waiting: {:?}", result),
        }
    }
}

async fn reply(query: &Query, result: MoveResult) {
    info!("Move finished: {:?}", result);
    let json = match serde_json::to_string(&MoveResponse::from(result)) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to encode move response: {}", e);
            return;
        }
    };
    if let Err(e) = query.reply(query.key_expr().clone(), json).await {
        warn!("Failed to reply to move request: {}", e);
    }
}

async fn reply_error(query: &Query, message: &str) {
    if let Err(e) = query.reply_err(message.to_string()).await {
        warn!("Failed to reply to move request: {}", e);
    }
}
