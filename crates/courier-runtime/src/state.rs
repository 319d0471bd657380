//! [`SharedVehicleState`] – the one shared record of where the vehicle is,
//! what it is doing, and when it will arrive.
//!
//! Three writers touch it: the pose poller (position), the delivery run
//! (phase), and the ETA tracker (eta).  Each operation takes the lock once,
//! so readers never see a half-written field group.

use std::sync::Arc;

use courier_types::{DeliveryPhase, Point3, Pose, VehicleState};
use tokio::sync::RwLock;
use tracing::info;

/// Cloneable handle; every clone refers to the same state.
#[derive(Clone, Debug, Default)]
pub struct SharedVehicleState {
    inner: Arc<RwLock<VehicleState>>,
}

impl SharedVehicleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consistent copy of every field.
    pub async fn snapshot(&self) -> VehicleState {
        *self.inner.read().await
    }

    pub async fn set_pose(&self, pose: Pose) {
        self.inner.write().await.pose = pose;
    }

    pub async fn position(&self) -> Point3 {
        self.inner.read().await.pose.position
    }

    pub async fn phase(&self) -> DeliveryPhase {
        self.inner.read().await.phase
    }

    /// Enter `phase`, clearing the ETA.
    pub async fn set_phase(&self, phase: DeliveryPhase) {
        let previous = {
            let mut state = self.inner.write().await;
            let previous = state.phase;
            state.phase = phase;
            state.eta = None;
            previous
        };
        if previous != phase {
            info!(from = %previous, to = %phase, "Phase transition");
        }
    }

    pub async fn eta(&self) -> Option<f64> {
        self.inner.read().await.eta
    }

    /// Keep the smallest ETA seen since it was last cleared.
    ///
    /// Returns the stored value.  Non-finite or negative candidates are
    /// ignored.
    pub async fn lower_eta(&self, candidate: f64) -> Option<f64> {
        let mut state = self.inner.write().await;
        if candidate.is_finite() && candidate >= 0.0 {
            state.eta = Some(state.eta.map_or(candidate, |current| current.min(candidate)));
        }
        state.eta
    }

    pub async fn clear_eta(&self) {
        self.inner.write().await.eta = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_idle_without_eta() {
        let state = SharedVehicleState::new();
        let snap = state.snapshot().await;
        assert_eq!(snap.phase, DeliveryPhase::Idle);
        assert_eq!(snap.eta, None);
    }

    #[tokio::test]
    async fn lower_eta_keeps_minimum() {
        let state = SharedVehicleState::new();
        assert_eq!(state.lower_eta(5.0).await, Some(5.0));
        assert_eq!(state.lower_eta(3.0).await, Some(3.0));
        // A larger sample (vehicle drifting away) does not raise it.
        assert_eq!(state.lower_eta(4.0).await, Some(3.0));
        assert_eq!(state.lower_eta(f64::NAN).await, Some(3.0));
        assert_eq!(state.lower_eta(-1.0).await, Some(3.0));
    }

    #[tokio::test]
    async fn phase_change_clears_eta() {
        let state = SharedVehicleState::new();
        state.set_phase(DeliveryPhase::EnRouteOut).await;
        state.lower_eta(2.5).await;
        state.set_phase(DeliveryPhase::Delivering).await;
        assert_eq!(state.eta().await, None);
        assert_eq!(state.phase().await, DeliveryPhase::Delivering);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let a = SharedVehicleState::new();
        let b = a.clone();
        a.set_pose(Pose::at(Point3::new(1.0, 2.0, 0.5))).await;
        assert_eq!(b.position().await, Point3::new(1.0, 2.0, 0.5));
        b.lower_eta(7.0).await;
        a.clear_eta().await;
        assert_eq!(b.eta().await, None);
    }
}
