//! `courier-cockpit` – the operator-facing HTTP + WebSocket server.
//!
//! Boots a small server (default port `5000`) that:
//!
//! 1. **Serves** the embedded operator page at `/`, `/Delivery`, and
//!    `/Order`.
//! 2. **Accepts** order registration (`POST /register_order`) and delivery
//!    requests (`POST /start_delivery`), forwarding them to the
//!    [`DeliveryCoordinator`].
//! 3. **Streams** vehicle and order snapshots to every browser connected to
//!    `/Delivery/ws` or `/Order/ws` via the [`BroadcastHub`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use courier_cockpit::CockpitServer;
//! use courier_hal::SimDrone;
//! use courier_middleware::BroadcastHub;
//! use courier_nav::WaypointGraph;
//! use courier_orders::OrderStore;
//! use courier_runtime::{DeliveryConfig, DeliveryCoordinator, SharedVehicleState};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let coordinator = DeliveryCoordinator::new(
//!         Arc::new(SimDrone::new()),
//!         Arc::new(WaypointGraph::default_layout(0.5)?),
//!         Arc::new(OrderStore::new()),
//!         SharedVehicleState::new(),
//!         DeliveryConfig::default(),
//!     )?;
//!     CockpitServer::new(Arc::new(coordinator), BroadcastHub::new())
//!         .run(CancellationToken::new())
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! [`DeliveryCoordinator`]: courier_runtime::DeliveryCoordinator
//! [`BroadcastHub`]: courier_middleware::BroadcastHub

pub mod server;

pub use server::{AppState, CockpitError, CockpitServer, DEFAULT_PORT};
