//! `courier-types` – shared data model for the Courier delivery stack.
//!
//! Every other crate speaks in these types: the vehicle pose and lifecycle
//! phase, queued orders, the snapshot pushed to live observers, and the
//! [`DeliveryError`] taxonomy surfaced to clients.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// Geometry
// ────────────────────────────────────────────────────────────────────────────

/// A point in 3-D space, in metres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    /// Create a new point.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Straight-line (Euclidean) distance to `other`.
    pub fn distance_to(&self, other: &Point3) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Vehicle attitude in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

/// Position plus orientation, as reported by the vehicle driver.
///
/// Serialises flat (`{x, y, z, roll, pitch, yaw}`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    #[serde(flatten)]
    pub position: Point3,
    #[serde(flatten)]
    pub orientation: Orientation,
}

impl Pose {
    /// A level pose at `position`.
    pub fn at(position: Point3) -> Self {
        Self {
            position,
            orientation: Orientation::default(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Vehicle state
// ────────────────────────────────────────────────────────────────────────────

/// Lifecycle phase of the delivery vehicle.  Exactly one is active at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPhase {
    /// No active delivery; the vehicle is parked on its home pad.
    #[default]
    Idle,
    /// Taking off and picking up cargo.
    Preparing,
    /// Flying the planned path toward the destination.
    EnRouteOut,
    /// Releasing cargo at the destination.
    Delivering,
    /// Cargo released and the order closed; about to head home.
    Completed,
    /// Retracing the path back to the home pad.
    Returning,
}

impl DeliveryPhase {
    /// True in the phases where a new delivery may be accepted.
    pub fn accepts_new_delivery(&self) -> bool {
        matches!(self, DeliveryPhase::Idle | DeliveryPhase::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryPhase::Idle => "idle",
            DeliveryPhase::Preparing => "preparing",
            DeliveryPhase::EnRouteOut => "en_route_out",
            DeliveryPhase::Delivering => "delivering",
            DeliveryPhase::Completed => "completed",
            DeliveryPhase::Returning => "returning",
        }
    }
}

impl fmt::Display for DeliveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable snapshot of the vehicle: pose, phase, and time-to-arrival.
///
/// Serialises to the wire shape `{x, y, z, roll, pitch, yaw, status, eta}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    #[serde(flatten)]
    pub pose: Pose,
    #[serde(rename = "status")]
    pub phase: DeliveryPhase,
    /// Seconds remaining to the current leg's target, absent between legs.
    pub eta: Option<f64>,
}

// ────────────────────────────────────────────────────────────────────────────
// Orders
// ────────────────────────────────────────────────────────────────────────────

/// Where an order is in its lifecycle.  Completed orders leave the store, so
/// there is no `Completed` variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    InDelivery,
}

/// A queued order: what is owed and where it goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    /// Item kind → positive quantity.
    pub items: BTreeMap<String, u32>,
    /// Destination waypoint id.
    pub destination: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Total number of items across all kinds.
    pub fn total_items(&self) -> u64 {
        self.items.values().map(|&q| u64::from(q)).sum()
    }
}

/// Payload pushed to every live subscriber on each broadcast tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub state: VehicleState,
    #[serde(rename = "order")]
    pub orders: Vec<Order>,
    pub timestamp: DateTime<Utc>,
}

impl Snapshot {
    /// Stamp `state` and `orders` with the current time.
    pub fn new(state: VehicleState, orders: Vec<Order>) -> Self {
        Self {
            state,
            orders,
            timestamp: Utc::now(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Error taxonomy shared by the order store, the coordinator, and the
/// vehicle driver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("A delivery is already in progress")]
    Busy,

    #[error("No route from {from} to {to}")]
    RouteUnreachable { from: String, to: String },

    #[error("Vehicle command '{command}' failed: {details}")]
    VehicleCommand { command: String, details: String },
}

impl DeliveryError {
    /// Shorthand for a driver-level failure.
    pub fn vehicle(command: impl Into<String>, details: impl Into<String>) -> Self {
        DeliveryError::VehicleCommand {
            command: command.into(),
            details: details.into(),
        }
    }

    /// HTTP status code used when the error is surfaced to a client.
    pub fn http_status(&self) -> u16 {
        match self {
            DeliveryError::Validation(_) => 400,
            DeliveryError::NotFound(_) => 404,
            DeliveryError::Busy => 409,
            DeliveryError::RouteUnreachable { .. } => 422,
            DeliveryError::VehicleCommand { .. } => 502,
        }
    }
}
