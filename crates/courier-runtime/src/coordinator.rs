//! [`DeliveryCoordinator`] – accepts orders and runs at most one delivery
//! at a time.
//!
//! # Run sequence
//!
//! | Phase | Vehicle work |
//! |---|---|
//! | `preparing` | take off, settle, fly to the pickup point, grip, hold |
//! | *(planning)* | A* route from the home node to the order's destination |
//! | `en_route_out` | fly through every route node; ETA toward the destination |
//! | `delivering` | release cargo, hold; the order is removed from the store |
//! | `completed` | held for `completed_hold` so observers see the hand-off |
//! | `returning` | fly the route backwards, then the home pad, then land; ETA toward the pad |
//! | `idle` | run finished, slot released |
//!
//! # Exclusivity
//!
//! A one-permit [`Semaphore`] is the delivery slot.  `begin_delivery` takes
//! the permit with `try_acquire_owned` and moves it into the spawned run, so
//! the slot is released when the run's future is dropped: on success, on
//! error, on panic, and on abort.  A panic inside the run is caught and
//! handled like a failed step, so the phase never stays stuck outside
//! `idle`.
//!
//! # Failure handling
//!
//! Any failed step ends the run.  The phase returns to `idle`, the ETA is
//! cleared, and the order goes back to `pending` if it is still in the
//! store.  An unreachable destination additionally lands the vehicle (best
//! effort) after releasing the cargo grip.  Failed vehicle commands are
//! never retried.  Any ETA tracker still running is joined before the phase
//! is reset.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use courier_hal::SimDrone;
//! use courier_nav::WaypointGraph;
//! use courier_orders::OrderStore;
//! use courier_runtime::{DeliveryConfig, DeliveryCoordinator, SharedVehicleState};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let graph = Arc::new(WaypointGraph::default_layout(0.5)?);
//! let coordinator = DeliveryCoordinator::new(
//!     Arc::new(SimDrone::new()),
//!     graph,
//!     Arc::new(OrderStore::new()),
//!     SharedVehicleState::new(),
//!     DeliveryConfig::default(),
//! )?;
//!
//! let items = BTreeMap::from([("omurice".to_string(), json!(2))]);
//! let id = coordinator.register_order(&items, "P2").await?;
//! coordinator.begin_delivery(&id).await?;
//! coordinator.wait_idle().await;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use courier_hal::VehicleDriver;
use courier_nav::{Route, WaypointGraph, find_path};
use courier_orders::OrderStore;
use courier_types::{DeliveryError, DeliveryPhase, Order, Point3, Snapshot};
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use crate::eta::EtaTracker;
use crate::state::SharedVehicleState;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Tunables for a delivery run.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryConfig {
    /// Graph node every outbound route starts from.
    pub home_node: String,
    /// Where the vehicle lands after the return leg.
    pub home_pad: Point3,
    /// Where cargo is picked up before the outbound leg.
    pub pickup: Point3,
    /// Takeoff altitude in metres.
    pub flight_height: f64,
    /// Outbound speed, m/s.
    pub cruise_speed: f64,
    /// Return speed, m/s.
    pub return_speed: f64,
    /// Pause after takeoff before the first move.
    pub takeoff_settle: Duration,
    /// Pause after gripping or releasing the cargo.
    pub cargo_hold: Duration,
    /// How long the `completed` phase is held before returning.
    pub completed_hold: Duration,
    /// ETA sampling period.
    pub eta_interval: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        let flight_height = 0.5;
        Self {
            home_node: "P0".to_string(),
            home_pad: Point3::new(0.0, 0.0, flight_height),
            pickup: Point3::new(2.0, 0.0, flight_height),
            flight_height,
            cruise_speed: 1.0,
            return_speed: 5.0,
            takeoff_settle: Duration::from_secs(1),
            cargo_hold: Duration::from_secs(2),
            completed_hold: Duration::from_secs(2),
            eta_interval: Duration::from_millis(100),
        }
    }
}

impl DeliveryConfig {
    /// Reject values no run could fly with.
    pub fn validate(&self) -> Result<(), DeliveryError> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(DeliveryError::Validation(format!("{name} must be positive, got {v}")))
            }
        };
        positive("flight_height", self.flight_height)?;
        positive("cruise_speed", self.cruise_speed)?;
        positive("return_speed", self.return_speed)?;
        if self.eta_interval.is_zero() {
            return Err(DeliveryError::Validation(
                "eta_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DeliveryCoordinator
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the delivery slot and spawns delivery runs.
pub struct DeliveryCoordinator {
    driver: Arc<dyn VehicleDriver>,
    graph: Arc<WaypointGraph>,
    orders: Arc<OrderStore>,
    state: SharedVehicleState,
    config: Arc<DeliveryConfig>,
    slot: Arc<Semaphore>,
    current: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl DeliveryCoordinator {
    /// # Errors
    ///
    /// [`DeliveryError::Validation`] when `config` is invalid or its home
    /// node is not in `graph`.
    pub fn new(
        driver: Arc<dyn VehicleDriver>,
        graph: Arc<WaypointGraph>,
        orders: Arc<OrderStore>,
        state: SharedVehicleState,
        config: DeliveryConfig,
    ) -> Result<Self, DeliveryError> {
        config.validate()?;
        if !graph.contains(&config.home_node) {
            return Err(DeliveryError::Validation(format!(
                "home node {} is not in the waypoint graph",
                config.home_node
            )));
        }
        Ok(Self {
            driver,
            graph,
            orders,
            state,
            config: Arc::new(config),
            slot: Arc::new(Semaphore::new(1)),
            current: Mutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn orders(&self) -> &Arc<OrderStore> {
        &self.orders
    }

    pub fn state(&self) -> &SharedVehicleState {
        &self.state
    }

    pub fn graph(&self) -> &Arc<WaypointGraph> {
        &self.graph
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Register an order for a known destination node.
    pub async fn register_order(
        &self,
        items: &BTreeMap<String, Value>,
        destination: &str,
    ) -> Result<String, DeliveryError> {
        let destination = destination.trim();
        if !destination.is_empty() && !self.graph.contains(destination) {
            return Err(DeliveryError::Validation(format!(
                "unknown destination {destination}"
            )));
        }
        self.orders.register(items, destination).await
    }

    /// Start delivering `order_id` in the background.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::NotFound`] for an unknown order and
    /// [`DeliveryError::Busy`] while another run holds the slot or the
    /// vehicle is not in a phase that accepts new work.
    pub async fn begin_delivery(&self, order_id: &str) -> Result<(), DeliveryError> {
        let order = self.orders.get(order_id).await?;
        let permit = self
            .slot
            .clone()
            .try_acquire_owned()
            .map_err(|_| DeliveryError::Busy)?;
        let phase = self.state.phase().await;
        if !phase.accepts_new_delivery() {
            warn!(order_id, %phase, "Slot free but vehicle not ready");
            return Err(DeliveryError::Busy);
        }
        self.orders.mark_in_delivery(order_id).await?;

        let run = DeliveryRun {
            driver: self.driver.clone(),
            graph: self.graph.clone(),
            orders: self.orders.clone(),
            state: self.state.clone(),
            config: self.config.clone(),
            cancel: self.shutdown.child_token(),
            eta: Mutex::new(None),
            order,
        };
        let span = info_span!("delivery", order_id = %run.order.id, destination = %run.order.destination);
        let handle = tokio::spawn(run.execute(permit).instrument(span));
        *self.current.lock().await = Some(handle);
        info!(order_id, "Delivery started");
        Ok(())
    }

    /// Whether a run currently holds the slot.
    pub fn is_active(&self) -> bool {
        self.slot.available_permits() == 0
    }

    /// Wait for the most recently started run to finish.
    pub async fn wait_idle(&self) {
        let handle = self.current.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(error = %e, "Delivery run panicked");
                }
            }
        }
    }

    /// Build the payload pushed to live observers.
    pub async fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.state.snapshot().await, self.orders.list().await)
    }

    /// Cancel the in-flight run, if any, and wait for it to requeue its
    /// order.  The vehicle is left where it is.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.current.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Delivery task ended abnormally");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DeliveryRun
// ─────────────────────────────────────────────────────────────────────────────

/// One delivery, from takeoff to landing.  Owned by its spawned task.
struct DeliveryRun {
    driver: Arc<dyn VehicleDriver>,
    graph: Arc<WaypointGraph>,
    orders: Arc<OrderStore>,
    state: SharedVehicleState,
    config: Arc<DeliveryConfig>,
    cancel: CancellationToken,
    /// Tracker of the leg being flown, if any.
    eta: Mutex<Option<EtaTracker>>,
    order: Order,
}

impl DeliveryRun {
    async fn execute(self, _slot: OwnedSemaphorePermit) {
        let flight = AssertUnwindSafe(self.fly()).catch_unwind();
        tokio::select! {
            outcome = flight => match outcome {
                Ok(Ok(())) => info!("Delivery run finished"),
                Ok(Err(e)) => self.abort(e).await,
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(panic = %message, "Delivery run panicked");
                    self.reset().await;
                }
            },
            () = self.cancel.cancelled() => {
                warn!("Delivery run interrupted by shutdown");
                self.reset().await;
            }
        }
    }

    async fn fly(&self) -> Result<(), DeliveryError> {
        let cfg = &*self.config;

        self.state.set_phase(DeliveryPhase::Preparing).await;
        self.driver.takeoff(cfg.flight_height).await?;
        tokio::time::sleep(cfg.takeoff_settle).await;
        self.driver.move_to_position(cfg.pickup, cfg.cruise_speed).await?;
        self.driver.set_cargo_grip(true).await?;
        tokio::time::sleep(cfg.cargo_hold).await;

        let route = find_path(&self.graph, &cfg.home_node, &self.order.destination).ok_or_else(
            || DeliveryError::RouteUnreachable {
                from: cfg.home_node.clone(),
                to: self.order.destination.clone(),
            },
        )?;
        info!(route = ?route.nodes, cost = route.cost, "Route planned");

        self.state.set_phase(DeliveryPhase::EnRouteOut).await;
        let outbound = self.waypoints(&route);
        let destination = outbound.last().copied().unwrap_or(cfg.pickup);
        self.fly_leg(&outbound, cfg.cruise_speed, destination).await?;

        self.state.set_phase(DeliveryPhase::Delivering).await;
        self.driver.set_cargo_grip(false).await?;
        tokio::time::sleep(cfg.cargo_hold).await;
        self.orders.complete(&self.order.id).await;

        self.state.set_phase(DeliveryPhase::Completed).await;
        tokio::time::sleep(cfg.completed_hold).await;

        self.state.set_phase(DeliveryPhase::Returning).await;
        // Already at the first node of the reversed route.
        let mut homeward: Vec<Point3> = self.waypoints(&route.reversed()).into_iter().skip(1).collect();
        homeward.push(cfg.home_pad);
        self.fly_leg(&homeward, cfg.return_speed, cfg.home_pad).await?;
        self.driver.land().await?;

        self.state.set_phase(DeliveryPhase::Idle).await;
        Ok(())
    }

    /// Fly through `points` with an ETA tracker running toward `eta_target`.
    /// The tracker is joined before returning on every path.
    async fn fly_leg(
        &self,
        points: &[Point3],
        speed: f64,
        eta_target: Point3,
    ) -> Result<(), DeliveryError> {
        *self.eta.lock().await = Some(EtaTracker::start(
            self.state.clone(),
            eta_target,
            speed,
            self.config.eta_interval,
            &self.cancel,
        ));
        let mut result = Ok(());
        for point in points {
            if let Err(e) = self.driver.move_to_position(*point, speed).await {
                result = Err(e);
                break;
            }
        }
        self.stop_eta().await;
        result
    }

    async fn stop_eta(&self) {
        let tracker = self.eta.lock().await.take();
        if let Some(tracker) = tracker {
            tracker.stop().await;
        }
    }

    fn waypoints(&self, route: &Route) -> Vec<Point3> {
        route
            .nodes
            .iter()
            .filter_map(|id| self.graph.node(id).map(|n| n.position))
            .collect()
    }

    async fn abort(&self, cause: DeliveryError) {
        error!(error = %cause, "Delivery run aborted");
        self.reset().await;
        if matches!(cause, DeliveryError::RouteUnreachable { .. }) {
            if let Err(e) = self.driver.set_cargo_grip(false).await {
                warn!(error = %e, "Releasing cargo after aborted run failed");
            }
            if let Err(e) = self.driver.land().await {
                warn!(error = %e, "Landing after aborted run failed");
            }
        }
    }

    /// Join any live ETA tracker, return to `idle` and requeue the order.
    /// The vehicle is not commanded.
    async fn reset(&self) {
        self.stop_eta().await;
        self.state.set_phase(DeliveryPhase::Idle).await;
        if let Err(e) = self.orders.mark_pending(&self.order.id).await {
            // Already delivered; nothing to requeue.
            info!(error = %e, "Order not requeued");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::PosePoller;
    use courier_hal::{DriverCommand, SimDrone};
    use courier_types::{OrderStatus, Pose};
    use serde_json::json;

    struct Rig {
        coordinator: DeliveryCoordinator,
        drone: Arc<SimDrone>,
        poller_stop: CancellationToken,
    }

    impl Drop for Rig {
        fn drop(&mut self) {
            self.poller_stop.cancel();
        }
    }

    fn fast_config() -> DeliveryConfig {
        DeliveryConfig {
            takeoff_settle: Duration::from_millis(5),
            cargo_hold: Duration::from_millis(5),
            completed_hold: Duration::from_millis(5),
            eta_interval: Duration::from_millis(1),
            ..DeliveryConfig::default()
        }
    }

    fn rig_with(drone: SimDrone) -> Rig {
        rig_scaled(drone, 200.0)
    }

    fn rig_scaled(drone: SimDrone, speedup: f64) -> Rig {
        let drone = Arc::new(drone.with_speedup(speedup).with_tick(Duration::from_millis(1)));
        let state = SharedVehicleState::new();
        let poller_stop = CancellationToken::new();
        PosePoller::new(drone.clone(), state.clone())
            .with_interval(Duration::from_millis(1))
            .spawn(poller_stop.clone());
        let coordinator = DeliveryCoordinator::new(
            drone.clone(),
            Arc::new(WaypointGraph::default_layout(0.5).unwrap()),
            Arc::new(OrderStore::new()),
            state,
            fast_config(),
        )
        .unwrap();
        Rig {
            coordinator,
            drone,
            poller_stop,
        }
    }

    fn rig() -> Rig {
        rig_with(SimDrone::new())
    }

    fn omurice(n: i64) -> BTreeMap<String, Value> {
        BTreeMap::from([("omurice".to_string(), json!(n))])
    }

    #[tokio::test]
    async fn full_delivery_to_p2() {
        let rig = rig();
        let c = &rig.coordinator;
        let id = c.register_order(&omurice(2), "P2").await.unwrap();

        c.begin_delivery(&id).await.unwrap();
        assert!(c.is_active());
        assert_eq!(c.orders().get(&id).await.unwrap().status, OrderStatus::InDelivery);
        c.wait_idle().await;

        assert!(!c.is_active());
        assert!(c.orders().is_empty().await);
        let state = c.state().snapshot().await;
        assert_eq!(state.phase, DeliveryPhase::Idle);
        assert_eq!(state.eta, None);
        assert!(!rig.drone.is_airborne());
        assert!(!rig.drone.is_gripping());

        let h = 0.5;
        let moves: Vec<Point3> = rig
            .drone
            .commands()
            .into_iter()
            .filter_map(|cmd| match cmd {
                DriverCommand::MoveTo { target, .. } => Some(target),
                _ => None,
            })
            .collect();
        assert_eq!(
            moves,
            vec![
                Point3::new(2.0, 0.0, h), // pickup
                Point3::new(0.0, 0.0, h), // P0
                Point3::new(3.0, 0.0, h), // P1
                Point3::new(3.0, 4.0, h), // P2
                Point3::new(3.0, 0.0, h), // P1
                Point3::new(0.0, 0.0, h), // P0
                Point3::new(0.0, 0.0, h), // home pad
            ]
        );
        let cmds = rig.drone.commands();
        assert_eq!(cmds.first(), Some(&DriverCommand::Takeoff(h)));
        assert_eq!(cmds.last(), Some(&DriverCommand::Land));
    }

    #[tokio::test]
    async fn phases_advance_in_order() {
        let rig = rig();
        let c = &rig.coordinator;
        let id = c.register_order(&omurice(1), "P1").await.unwrap();

        let watcher = {
            let state = c.state().clone();
            tokio::spawn(async move {
                let mut seen = vec![DeliveryPhase::Idle];
                loop {
                    let phase = state.phase().await;
                    if seen.last() != Some(&phase) {
                        seen.push(phase);
                        if phase == DeliveryPhase::Idle {
                            return seen;
                        }
                    }
                    tokio::time::sleep(Duration::from_micros(200)).await;
                }
            })
        };
        c.begin_delivery(&id).await.unwrap();
        c.wait_idle().await;
        let seen = tokio::time::timeout(Duration::from_secs(5), watcher)
            .await
            .unwrap()
            .unwrap();

        let rank = |p: &DeliveryPhase| match p {
            DeliveryPhase::Idle => 0,
            DeliveryPhase::Preparing => 1,
            DeliveryPhase::EnRouteOut => 2,
            DeliveryPhase::Delivering => 3,
            DeliveryPhase::Completed => 4,
            DeliveryPhase::Returning => 5,
        };
        let middle = &seen[1..seen.len() - 1];
        assert!(middle.windows(2).all(|w| rank(&w[0]) < rank(&w[1])), "{seen:?}");
        for phase in [
            DeliveryPhase::Preparing,
            DeliveryPhase::EnRouteOut,
            DeliveryPhase::Delivering,
            DeliveryPhase::Completed,
            DeliveryPhase::Returning,
        ] {
            assert!(middle.contains(&phase), "{phase} never observed: {seen:?}");
        }
    }

    #[tokio::test]
    async fn concurrent_starts_admit_exactly_one() {
        let rig = rig();
        let c = &rig.coordinator;
        let a = c.register_order(&omurice(1), "P2").await.unwrap();
        let b = c.register_order(&omurice(1), "P3").await.unwrap();

        let (ra, rb) = tokio::join!(c.begin_delivery(&a), c.begin_delivery(&b));
        let busy = [&ra, &rb]
            .iter()
            .filter(|r| matches!(r, Err(DeliveryError::Busy)))
            .count();
        assert_eq!(busy, 1, "got {ra:?} / {rb:?}");
        assert_eq!([&ra, &rb].iter().filter(|r| r.is_ok()).count(), 1);

        c.wait_idle().await;
        // The rejected order is untouched.
        let rejected = if ra.is_ok() { &b } else { &a };
        assert_eq!(c.orders().get(rejected).await.unwrap().status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn busy_while_running_then_free() {
        let rig = rig();
        let c = &rig.coordinator;
        let a = c.register_order(&omurice(1), "P1").await.unwrap();
        let b = c.register_order(&omurice(1), "P4").await.unwrap();

        c.begin_delivery(&a).await.unwrap();
        assert_eq!(c.begin_delivery(&b).await, Err(DeliveryError::Busy));
        c.wait_idle().await;
        c.begin_delivery(&b).await.unwrap();
        c.wait_idle().await;
        assert!(c.orders().is_empty().await);
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let rig = rig();
        let c = &rig.coordinator;
        assert!(matches!(
            c.begin_delivery("nope").await,
            Err(DeliveryError::NotFound(_))
        ));
        assert!(!c.is_active());
    }

    #[tokio::test]
    async fn unknown_destination_is_rejected_at_registration() {
        let rig = rig();
        let err = rig
            .coordinator
            .register_order(&omurice(1), "P99")
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Validation(_)));
        assert!(rig.coordinator.orders().is_empty().await);
    }

    #[tokio::test]
    async fn unreachable_destination_requeues_and_lands() {
        let rig = rig();
        let c = &rig.coordinator;
        let id = c.register_order(&omurice(1), "ISLAND").await.unwrap();

        c.begin_delivery(&id).await.unwrap();
        c.wait_idle().await;

        assert!(!c.is_active());
        assert_eq!(c.orders().get(&id).await.unwrap().status, OrderStatus::Pending);
        let state = c.state().snapshot().await;
        assert_eq!(state.phase, DeliveryPhase::Idle);
        assert_eq!(state.eta, None);
        assert!(!rig.drone.is_airborne());
        assert!(!rig.drone.is_gripping());
        let cmds = rig.drone.commands();
        assert_eq!(
            &cmds[cmds.len() - 2..],
            &[DriverCommand::Grip(false), DriverCommand::Land]
        );
    }

    #[tokio::test]
    async fn vehicle_failure_releases_slot_without_retry() {
        // Move #2 is the first outbound waypoint.
        let rig = rig_with(SimDrone::new().with_failure_on_move(2));
        let c = &rig.coordinator;
        let id = c.register_order(&omurice(1), "P2").await.unwrap();

        c.begin_delivery(&id).await.unwrap();
        c.wait_idle().await;

        assert!(!c.is_active());
        assert_eq!(c.orders().get(&id).await.unwrap().status, OrderStatus::Pending);
        assert_eq!(c.state().phase().await, DeliveryPhase::Idle);
        assert_eq!(c.state().eta().await, None);
        let moves = rig
            .drone
            .commands()
            .iter()
            .filter(|cmd| matches!(cmd, DriverCommand::MoveTo { .. }))
            .count();
        assert_eq!(moves, 2, "failed command is not retried");
        assert!(!rig.drone.commands().contains(&DriverCommand::Land));

        // The slot is free for the requeued order.
        c.begin_delivery(&id).await.unwrap();
        c.wait_idle().await;
        assert!(c.orders().is_empty().await);
    }

    #[tokio::test]
    async fn eta_never_rises_within_a_phase() {
        let rig = rig();
        let c = &rig.coordinator;
        let id = c.register_order(&omurice(1), "P3").await.unwrap();

        let sampler = {
            let state = c.state().clone();
            tokio::spawn(async move {
                let mut samples = Vec::new();
                let mut started = false;
                loop {
                    let s = state.snapshot().await;
                    samples.push((s.phase, s.eta));
                    if s.phase != DeliveryPhase::Idle {
                        started = true;
                    } else if started {
                        return samples;
                    }
                    tokio::time::sleep(Duration::from_micros(300)).await;
                }
            })
        };
        c.begin_delivery(&id).await.unwrap();
        c.wait_idle().await;
        let samples = tokio::time::timeout(Duration::from_secs(5), sampler)
            .await
            .unwrap()
            .unwrap();

        let mut saw_eta = false;
        for w in samples.windows(2) {
            if let ((p0, Some(e0)), (p1, Some(e1))) = (w[0], w[1]) {
                saw_eta = true;
                if p0 == p1 {
                    assert!(e1 <= e0, "ETA rose from {e0} to {e1} during {p0}");
                }
            }
        }
        assert!(saw_eta, "no ETA observed during the run");
    }

    #[tokio::test]
    async fn shutdown_aborts_run_and_frees_slot() {
        let rig = rig();
        let c = &rig.coordinator;
        let id = c.register_order(&omurice(1), "P3").await.unwrap();
        c.begin_delivery(&id).await.unwrap();
        c.shutdown().await;
        assert!(!c.is_active());
        assert_eq!(c.state().phase().await, DeliveryPhase::Idle);
        let order = c.orders().get(&id).await.expect("order kept");
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn shutdown_mid_leg_leaves_no_eta_behind() {
        let rig = rig_scaled(SimDrone::new(), 20.0);
        let c = &rig.coordinator;
        let id = c.register_order(&omurice(1), "P3").await.unwrap();
        c.begin_delivery(&id).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while c.state().eta().await.is_none() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("ETA published during the outbound leg");
        c.shutdown().await;

        // Give any straggling sampler a chance to write.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let state = c.state().snapshot().await;
        assert_eq!(state.phase, DeliveryPhase::Idle);
        assert_eq!(state.eta, None);
    }

    /// Panics on the first move, then behaves like the simulator.
    struct FlakyDriver {
        inner: SimDrone,
        panicked: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl VehicleDriver for FlakyDriver {
        async fn takeoff(&self, height: f64) -> Result<(), DeliveryError> {
            self.inner.takeoff(height).await
        }
        async fn land(&self) -> Result<(), DeliveryError> {
            self.inner.land().await
        }
        async fn move_to_position(&self, target: Point3, speed: f64) -> Result<(), DeliveryError> {
            if !self.panicked.swap(true, std::sync::atomic::Ordering::SeqCst) {
                panic!("flight controller crashed");
            }
            self.inner.move_to_position(target, speed).await
        }
        async fn set_cargo_grip(&self, grip: bool) -> Result<(), DeliveryError> {
            self.inner.set_cargo_grip(grip).await
        }
        async fn current_pose(&self) -> Result<Pose, DeliveryError> {
            self.inner.current_pose().await
        }
    }

    #[tokio::test]
    async fn panicking_run_does_not_wedge_the_slot() {
        let driver = Arc::new(FlakyDriver {
            inner: SimDrone::new()
                .with_speedup(200.0)
                .with_tick(Duration::from_millis(1)),
            panicked: std::sync::atomic::AtomicBool::new(false),
        });
        let c = DeliveryCoordinator::new(
            driver,
            Arc::new(WaypointGraph::default_layout(0.5).unwrap()),
            Arc::new(OrderStore::new()),
            SharedVehicleState::new(),
            fast_config(),
        )
        .unwrap();
        let a = c.register_order(&omurice(1), "P1").await.unwrap();

        c.begin_delivery(&a).await.unwrap();
        c.wait_idle().await;

        assert!(!c.is_active());
        assert_eq!(c.state().phase().await, DeliveryPhase::Idle);
        assert_eq!(c.state().eta().await, None);
        assert_eq!(c.orders().get(&a).await.unwrap().status, OrderStatus::Pending);

        c.begin_delivery(&a).await.expect("slot usable after a panic");
        c.wait_idle().await;
        assert!(c.orders().is_empty().await);
    }

    #[test]
    fn config_validation() {
        assert!(DeliveryConfig::default().validate().is_ok());
        let bad = DeliveryConfig {
            cruise_speed: 0.0,
            ..DeliveryConfig::default()
        };
        assert!(matches!(bad.validate(), Err(DeliveryError::Validation(m)) if m.contains("cruise_speed")));
    }

    #[test]
    fn unknown_home_node_is_rejected() {
        let result = DeliveryCoordinator::new(
            Arc::new(SimDrone::new()),
            Arc::new(WaypointGraph::default_layout(0.5).unwrap()),
            Arc::new(OrderStore::new()),
            SharedVehicleState::new(),
            DeliveryConfig {
                home_node: "HQ".to_string(),
                ..DeliveryConfig::default()
            },
        );
        assert!(matches!(result, Err(DeliveryError::Validation(_))));
    }
}
