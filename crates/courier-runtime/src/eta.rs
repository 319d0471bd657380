//! Arrival-time estimation for a single flight leg.
//!
//! While a leg is flown, an [`EtaTracker`] samples the shared position on a
//! fixed period and offers `distance / speed` to
//! [`SharedVehicleState::lower_eta`].  The published ETA therefore only ever
//! decreases during a leg; if the vehicle drifts away from the target the
//! estimate stays at its lowest value until the next phase change clears it.

use std::time::Duration;

use courier_types::Point3;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::state::SharedVehicleState;

/// Straight-line seconds to `target` at `speed` m/s.
pub fn estimate(from: &Point3, target: &Point3, speed: f64) -> f64 {
    from.distance_to(target) / speed
}

/// Handle to a running estimator task.
pub struct EtaTracker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl EtaTracker {
    /// Start sampling toward `target`.  The task also stops when `parent`
    /// is cancelled.
    pub fn start(
        state: SharedVehicleState,
        target: Point3,
        speed: f64,
        interval: Duration,
        parent: &CancellationToken,
    ) -> Self {
        let token = parent.child_token();
        let stop = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let here = state.position().await;
                        let eta = state.lower_eta(estimate(&here, &target, speed)).await;
                        trace!(?eta, "ETA sample");
                    }
                }
            }
        });
        debug!(x = target.x, y = target.y, z = target.z, speed, "ETA tracker started");
        Self { token, handle }
    }

    /// Stop the task and wait for it to exit.  No ETA write happens after
    /// this returns.
    pub async fn stop(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::Pose;

    #[test]
    fn estimate_is_distance_over_speed() {
        let eta = estimate(&Point3::new(0.0, 0.0, 0.5), &Point3::new(3.0, 4.0, 0.5), 2.0);
        assert!((eta - 2.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn publishes_while_approaching() {
        let state = SharedVehicleState::new();
        let root = CancellationToken::new();
        let tracker = EtaTracker::start(
            state.clone(),
            Point3::new(10.0, 0.0, 0.0),
            1.0,
            Duration::from_millis(2),
            &root,
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(state.eta().await, Some(10.0));

        state.set_pose(Pose::at(Point3::new(6.0, 0.0, 0.0))).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(state.eta().await, Some(4.0));
        tracker.stop().await;
    }

    #[tokio::test]
    async fn moving_away_leaves_stale_low_value() {
        let state = SharedVehicleState::new();
        state.set_pose(Pose::at(Point3::new(8.0, 0.0, 0.0))).await;
        let root = CancellationToken::new();
        let tracker = EtaTracker::start(
            state.clone(),
            Point3::new(10.0, 0.0, 0.0),
            1.0,
            Duration::from_millis(2),
            &root,
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(state.eta().await, Some(2.0));

        // Blown off course: the true estimate is now 10 s but the published
        // value does not rise.
        state.set_pose(Pose::at(Point3::new(0.0, 0.0, 0.0))).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(state.eta().await, Some(2.0));
        tracker.stop().await;
    }

    #[tokio::test]
    async fn no_writes_after_stop() {
        let state = SharedVehicleState::new();
        let root = CancellationToken::new();
        let tracker = EtaTracker::start(
            state.clone(),
            Point3::new(5.0, 0.0, 0.0),
            1.0,
            Duration::from_millis(1),
            &root,
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        tracker.stop().await;
        state.clear_eta().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(state.eta().await, None);
    }

    #[tokio::test]
    async fn parent_cancellation_stops_tracker() {
        let state = SharedVehicleState::new();
        let root = CancellationToken::new();
        let tracker = EtaTracker::start(
            state,
            Point3::new(5.0, 0.0, 0.0),
            1.0,
            Duration::from_millis(1),
            &root,
        );
        root.cancel();
        tokio::time::timeout(Duration::from_secs(1), tracker.handle)
            .await
            .expect("tracker exits with its parent")
            .unwrap();
    }
}
