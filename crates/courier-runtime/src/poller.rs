//! Periodic pose sampling from the vehicle driver into [`SharedVehicleState`].

use std::sync::Arc;
use std::time::Duration;

use courier_hal::VehicleDriver;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::state::SharedVehicleState;

/// Default sampling period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Copies `current_pose` into the shared state every `interval`.
pub struct PosePoller {
    driver: Arc<dyn VehicleDriver>,
    state: SharedVehicleState,
    interval: Duration,
}

impl PosePoller {
    pub fn new(driver: Arc<dyn VehicleDriver>, state: SharedVehicleState) -> Self {
        Self {
            driver,
            state,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run until `shutdown` is cancelled.  A failed read is logged and the
    /// previous pose is kept.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_ms = self.interval.as_millis() as u64, "Pose poller started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => match self.driver.current_pose().await {
                    Ok(pose) => self.state.set_pose(pose).await,
                    Err(e) => warn!(error = %e, "Pose read failed"),
                },
            }
        }
        info!("Pose poller stopped");
    }

    /// Spawn [`run`](Self::run) onto the current runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
