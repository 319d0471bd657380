//! `courier-hal` – Vehicle Abstraction Layer.
//!
//! # Modules
//!
//! - [`driver`] – [`VehicleDriver`]: the capability the delivery core
//!   consumes (takeoff, land, move, cargo grip, pose read).
//! - [`sim`] – [`SimDrone`]: an in-process simulator that implements the
//!   driver with tick-based kinematics and a command log, so the full stack
//!   runs in tests and demos without a flight controller.

pub mod driver;
pub mod sim;

pub use driver::VehicleDriver;
pub use sim::{DriverCommand, SimDrone};
