//! `courier` – single-drone delivery service.
//!
//! Starts every long-running piece of the stack and wires them together:
//!
//! 1. Loads configuration (`courier [config.toml]`, else
//!    `~/.courier/config.toml`, else defaults) and the waypoint graph.
//! 2. Spawns the pose poller and the snapshot broadcaster.
//! 3. Serves the operator HTTP + WebSocket surface until **Ctrl-C**, which
//!    cancels the root token, aborts any in-flight delivery, and waits for
//!    the background tasks to stop.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use courier_cockpit::{CockpitError, CockpitServer};
use courier_hal::SimDrone;
use courier_middleware::BroadcastHub;
use courier_nav::{GraphError, WaypointGraph};
use courier_orders::OrderStore;
use courier_runtime::{DeliveryCoordinator, PosePoller, SharedVehicleState, init_tracing};
use courier_types::{DeliveryError, Point3};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, ConfigError};

#[derive(Error, Debug)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error(transparent)]
    Cockpit(#[from] CockpitError),
    #[error("Failed to start async runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

fn main() -> ExitCode {
    let _tracing = init_tracing("courier");

    let config_arg = std::env::args_os().nth(1).map(PathBuf::from);
    if config_arg
        .as_deref()
        .is_some_and(|a| a.as_os_str() == "-h" || a.as_os_str() == "--help")
    {
        println!("usage: courier [CONFIG.toml]");
        return ExitCode::SUCCESS;
    }

    match start(config_arg) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "courier failed");
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn start(config_arg: Option<PathBuf>) -> Result<(), StartupError> {
    let cfg = config::load(config_arg.as_deref())?;

    let runtime = tokio::runtime::Runtime::new()?;

    // ── Ctrl-C → root cancellation ────────────────────────────────────────
    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("{}", "Ctrl-C received, shutting down …".yellow().bold());
        on_signal.cancel();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown unavailable");
    }

    runtime.block_on(serve(cfg, shutdown))
}

async fn serve(cfg: Config, shutdown: CancellationToken) -> Result<(), StartupError> {
    let delivery = cfg.delivery_config();
    let graph = match &cfg.graph_path {
        Some(path) => WaypointGraph::load(path, delivery.flight_height)?,
        None => {
            info!("No graph_path configured; using the built-in demo layout");
            WaypointGraph::default_layout(delivery.flight_height)?
        }
    };

    let pad = delivery.home_pad;
    let drone = Arc::new(
        SimDrone::new()
            .at(Point3::new(pad.x, pad.y, 0.0))
            .with_speedup(cfg.sim_speedup),
    );
    let state = SharedVehicleState::new();
    let coordinator = Arc::new(DeliveryCoordinator::new(
        drone.clone(),
        Arc::new(graph),
        Arc::new(OrderStore::new()),
        state.clone(),
        delivery,
    )?);
    let hub = BroadcastHub::new();

    let poller = PosePoller::new(drone, state)
        .with_interval(cfg.poll_interval())
        .spawn(shutdown.child_token());

    let broadcaster = {
        let hub = hub.clone();
        let coordinator = coordinator.clone();
        let interval = cfg.broadcast_interval();
        let token = shutdown.child_token();
        tokio::spawn(async move {
            hub.run(interval, token, move || {
                let coordinator = coordinator.clone();
                async move { coordinator.snapshot().await }
            })
            .await;
        })
    };

    print_banner(cfg.http_port);
    let served = CockpitServer::new(coordinator.clone(), hub)
        .with_port(cfg.http_port)
        .run(shutdown.clone())
        .await;

    // The server only returns on cancellation or a bind failure; stop
    // everything else either way.
    shutdown.cancel();
    coordinator.shutdown().await;
    for (name, task) in [("poller", poller), ("broadcaster", broadcaster)] {
        if let Err(e) = task.await {
            warn!(task = name, error = %e, "Background task ended abnormally");
        }
    }
    info!("courier stopped");
    served.map_err(StartupError::from)
}

fn print_banner(port: u16) {
    println!();
    println!("  {} {}", "courier".bold().cyan(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Delivery page  {}", format!("http://localhost:{port}/Delivery").bold());
    println!("  Order page     {}", format!("http://localhost:{port}/Order").bold());
    println!("  Press Ctrl-C to stop.");
    println!();
}
