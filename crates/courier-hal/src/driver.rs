//! Generic `VehicleDriver` trait for the delivery drone.
//!
//! The coordinator only ever talks to this trait, so the in-process
//! [`SimDrone`][crate::sim::SimDrone] and a real flight-controller binding can
//! be swapped without touching planning or delivery logic.
//!
//! Every method completes when the vehicle confirms the command (or fails).
//! Callers do not retry.

use async_trait::async_trait;
use courier_types::{DeliveryError, Point3, Pose};

/// A single multirotor with a cargo gripper.
#[async_trait]
pub trait VehicleDriver: Send + Sync {
    /// Arm and climb to `height` metres above the pad.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::VehicleCommand`] if the vehicle rejects the
    /// command or fails to reach altitude.
    async fn takeoff(&self, height: f64) -> Result<(), DeliveryError>;

    /// Descend and disarm.
    async fn land(&self) -> Result<(), DeliveryError>;

    /// Fly to `target` at `speed` m/s and return once it has arrived.
    async fn move_to_position(&self, target: Point3, speed: f64) -> Result<(), DeliveryError>;

    /// Close (`true`) or open (`false`) the cargo gripper.
    async fn set_cargo_grip(&self, grip: bool) -> Result<(), DeliveryError>;

    /// Current position and orientation.
    async fn current_pose(&self) -> Result<Pose, DeliveryError>;
}
