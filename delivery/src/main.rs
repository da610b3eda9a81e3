use actix::prelude::*;
use colored::Color;
use common::config::DispatchConfig;
use common::constants::{SIMULATED_ORDER_COUNT, SIMULATION_RADIUS_KM};
use common::errors::DispatchError;
use common::logger::Logger;
use common::types::dtos::Coordinate;
use delivery::delivery_actors::dispatch_coordinator::DispatchCoordinator;
use delivery::delivery_actors::ui_handler::UIHandler;
use delivery::engine::DispatchEngine;
use delivery::messages::ui_messages::{
    AcknowledgeFinishedOrder, GetDispatchSnapshot, RequestAccept, RequestAdvance,
    RequestComplete, RequestTogglePresence,
};
use delivery::simulation::{
    InMemoryBackend, SimulatedLocationSource, StaticAuth, in_memory_collaborators,
};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::ctrl_c;

/// Pause between two steps of the simulated delivery.
const STEP_PAUSE: Duration = Duration::from_secs(3);
const LOCATION_CADENCE: Duration = Duration::from_secs(2);

fn load_config(path: Option<&String>) -> Result<DispatchConfig, DispatchError> {
    let base = match path {
        Some(path) => DispatchConfig::from_json_file(path)?,
        None => DispatchConfig::default(),
    };
    base.from_env_lookup(|key| env::var(key).ok())
}

async fn wait_for_nearest(
    coordinator: &Addr<DispatchCoordinator>,
) -> Result<String, DispatchError> {
    for _ in 0..30 {
        let snapshot = coordinator.send(GetDispatchSnapshot).await?;
        if let Some(nearest) = snapshot.nearby_orders.first() {
            return Ok(nearest.order_id.clone());
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    Err(DispatchError::not_found("no order showed up nearby"))
}

/// Goes online, takes the nearest order and delivers it.
async fn run_shift(
    coordinator: Addr<DispatchCoordinator>,
    logger: Logger,
) -> Result<(), DispatchError> {
    coordinator.send(RequestTogglePresence).await??;

    let order_id = wait_for_nearest(&coordinator).await?;
    let order = coordinator
        .send(RequestAccept {
            order_id: order_id.clone(),
        })
        .await??;
    logger.info(format!(
        "Took order {}: {} -> {}",
        order.order_id, order.pickup.address, order.dropoff.address
    ));

    for _ in 0..2 {
        tokio::time::sleep(STEP_PAUSE).await;
        let order = coordinator
            .send(RequestAdvance {
                order_id: order_id.clone(),
            })
            .await??;
        logger.info(format!("Order {} is now {}", order.order_id, order.status));
    }

    tokio::time::sleep(STEP_PAUSE).await;
    let done = coordinator
        .send(RequestComplete {
            order_id: order_id.clone(),
            photo_url: Some(format!("https://proofs.local/{}.jpg", order_id)),
            signature_url: None,
        })
        .await??;
    logger.info(format!("Order {} {}", done.order_id, done.status));
    coordinator.send(AcknowledgeFinishedOrder).await?;
    Ok(())
}

#[actix::main]
async fn main() -> std::io::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <agent_id> [config.json]", args[0]);
        std::process::exit(1);
    }
    let agent_id = args[1].clone();
    let config = match load_config(args.get(2)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let logger = Logger::new(format!("Agent {}", agent_id), Color::White)
        .with_verbose(config.verbose_logging);
    let start = Coordinate {
        lat: 37.5665,
        lon: 126.9780,
    };

    let backend = Arc::new(InMemoryBackend::new(agent_id.clone()));
    let seeded = backend.seed_orders_around(start, SIMULATED_ORDER_COUNT, SIMULATION_RADIUS_KM);
    logger.info(format!("Simulated backend published {} orders", seeded.len()));

    let auth = Arc::new(StaticAuth::signed_in(format!("token-{}", agent_id)));
    let source = Arc::new(SimulatedLocationSource::new(start, LOCATION_CADENCE));
    let engine = DispatchEngine::start(&config, in_memory_collaborators(backend, auth, source));
    UIHandler::new(engine.coordinator.clone(), logger.clone()).start();

    let shift_logger = logger.clone();
    let coordinator = engine.coordinator.clone();
    actix::spawn(async move {
        match run_shift(coordinator, shift_logger.clone()).await {
            Ok(()) => shift_logger.info("Shift finished, press Ctrl-C to exit"),
            Err(e) => shift_logger.error(format!("Shift interrupted: {}", e)),
        }
    });

    tokio::select! {
        _ = ctrl_c() => {
            logger.info("Ctrl-C received, shutting down...");
        }
    }

    Ok(())
}
