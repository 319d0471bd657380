//! `courier-runtime` – the delivery engine.
//!
//! Everything that moves while the process runs lives here: the shared
//! vehicle state, the loops that keep it fresh, and the coordinator that
//! drives a delivery from takeoff to landing.
//!
//! # Modules
//!
//! - [`state`] – [`SharedVehicleState`][state::SharedVehicleState]: pose,
//!   phase, and ETA behind one async lock, with the monotonic-minimum ETA
//!   rule.
//! - [`poller`] – [`PosePoller`][poller::PosePoller]: copies the driver's
//!   pose into the shared state on a fixed period.
//! - [`eta`] – [`EtaTracker`][eta::EtaTracker]: per-leg arrival estimate,
//!   started and joined by the delivery run.
//! - [`coordinator`] – [`DeliveryCoordinator`][coordinator::DeliveryCoordinator]:
//!   order registration, the single delivery slot, and the phase machine.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with optional OTLP span export.

pub mod coordinator;
pub mod eta;
pub mod poller;
pub mod state;
pub mod telemetry;

pub use coordinator::{DeliveryConfig, DeliveryCoordinator};
pub use eta::EtaTracker;
pub use poller::{DEFAULT_POLL_INTERVAL, PosePoller};
pub use state::SharedVehicleState;
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
