//! In-process drone simulator for tests and hardware-free runs.
//!
//! [`SimDrone`] implements [`VehicleDriver`] with simple kinematics: every
//! movement command advances the simulated position toward its target in
//! fixed ticks at the commanded speed, so pose reads taken concurrently (by
//! the pose poller) observe the vehicle in motion.  Every command is also
//! recorded so tests can assert on the exact command sequence.
//!
//! # Example
//!
//! ```rust
//! use courier_hal::{SimDrone, VehicleDriver};
//! use courier_types::Point3;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let drone = SimDrone::new().with_speedup(100.0);
//!     drone.takeoff(0.5).await.unwrap();
//!     drone.move_to_position(Point3::new(1.0, 0.0, 0.5), 1.0).await.unwrap();
//!     let pose = drone.current_pose().await.unwrap();
//!     assert!((pose.position.x - 1.0).abs() < 1e-9);
//! }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use courier_types::{DeliveryError, Point3, Pose};
use tracing::debug;

use crate::driver::VehicleDriver;

/// Vertical speed used for takeoff and landing, m/s.
const CLIMB_SPEED: f64 = 1.0;

/// Simulation step.
const DEFAULT_TICK: Duration = Duration::from_millis(20);

/// A command as received by the simulator.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCommand {
    Takeoff(f64),
    Land,
    MoveTo { target: Point3, speed: f64 },
    Grip(bool),
}

struct SimState {
    pose: Pose,
    airborne: bool,
    gripping: bool,
    moves_issued: usize,
    commands: Vec<DriverCommand>,
}

/// Simulated multirotor with a cargo gripper.
pub struct SimDrone {
    state: Mutex<SimState>,
    tick: Duration,
    speedup: f64,
    fail_on_move: Option<usize>,
}

impl Default for SimDrone {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDrone {
    /// A landed drone at the origin, running in real time.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                pose: Pose::default(),
                airborne: false,
                gripping: false,
                moves_issued: 0,
                commands: Vec::new(),
            }),
            tick: DEFAULT_TICK,
            speedup: 1.0,
            fail_on_move: None,
        }
    }

    /// Start from `position` instead of the origin.
    pub fn at(self, position: Point3) -> Self {
        self.lock().pose = Pose::at(position);
        self
    }

    /// Scale simulated time: a speed-up of 10 completes moves ten times
    /// faster than the commanded speed implies.
    pub fn with_speedup(mut self, speedup: f64) -> Self {
        self.speedup = speedup.max(f64::EPSILON);
        self
    }

    /// Override the simulation step.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Make the `n`-th `move_to_position` call (1-based) fail with a
    /// [`DeliveryError::VehicleCommand`] before moving.
    pub fn with_failure_on_move(mut self, n: usize) -> Self {
        self.fail_on_move = Some(n);
        self
    }

    /// Every command received so far, in order.
    pub fn commands(&self) -> Vec<DriverCommand> {
        self.lock().commands.clone()
    }

    pub fn is_airborne(&self) -> bool {
        self.lock().airborne
    }

    pub fn is_gripping(&self) -> bool {
        self.lock().gripping
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Step toward `target` until arrival.  The lock is never held across an
    /// await point.
    async fn fly_to(&self, target: Point3, speed: f64) {
        let step = speed * self.speedup * self.tick.as_secs_f64();
        loop {
            let arrived = {
                let mut state = self.lock();
                let here = state.pose.position;
                let remaining = here.distance_to(&target);
                if remaining <= step {
                    state.pose.position = target;
                    true
                } else {
                    let f = step / remaining;
                    state.pose.position = Point3::new(
                        here.x + (target.x - here.x) * f,
                        here.y + (target.y - here.y) * f,
                        here.z + (target.z - here.z) * f,
                    );
                    let (dx, dy) = (target.x - here.x, target.y - here.y);
                    if dx.abs() > f64::EPSILON || dy.abs() > f64::EPSILON {
                        state.pose.orientation.yaw = dy.atan2(dx);
                    }
                    false
                }
            };
            if arrived {
                return;
            }
            tokio::time::sleep(self.tick).await;
        }
    }
}

fn validate_target(target: &Point3, speed: f64) -> Result<(), DeliveryError> {
    if !(target.x.is_finite() && target.y.is_finite() && target.z.is_finite()) {
        return Err(DeliveryError::vehicle("move_to_position", "target is not finite"));
    }
    if !(speed.is_finite() && speed > 0.0) {
        return Err(DeliveryError::vehicle(
            "move_to_position",
            format!("invalid speed {speed}"),
        ));
    }
    Ok(())
}

#[async_trait]
impl VehicleDriver for SimDrone {
    async fn takeoff(&self, height: f64) -> Result<(), DeliveryError> {
        let target = {
            let mut state = self.lock();
            state.commands.push(DriverCommand::Takeoff(height));
            if !(height.is_finite() && height > 0.0) {
                return Err(DeliveryError::vehicle("takeoff", format!("invalid height {height}")));
            }
            state.airborne = true;
            let p = state.pose.position;
            Point3::new(p.x, p.y, height)
        };
        debug!(height, "sim: takeoff");
        self.fly_to(target, CLIMB_SPEED).await;
        Ok(())
    }

    async fn land(&self) -> Result<(), DeliveryError> {
        let target = {
            let mut state = self.lock();
            state.commands.push(DriverCommand::Land);
            let p = state.pose.position;
            Point3::new(p.x, p.y, 0.0)
        };
        debug!("sim: land");
        self.fly_to(target, CLIMB_SPEED).await;
        self.lock().airborne = false;
        Ok(())
    }

    async fn move_to_position(&self, target: Point3, speed: f64) -> Result<(), DeliveryError> {
        {
            let mut state = self.lock();
            state.commands.push(DriverCommand::MoveTo { target, speed });
            state.moves_issued += 1;
            if self.fail_on_move == Some(state.moves_issued) {
                return Err(DeliveryError::vehicle(
                    "move_to_position",
                    "simulated flight controller fault",
                ));
            }
            if !state.airborne {
                return Err(DeliveryError::vehicle("move_to_position", "vehicle is landed"));
            }
        }
        validate_target(&target, speed)?;
        debug!(x = target.x, y = target.y, z = target.z, speed, "sim: move");
        self.fly_to(target, speed).await;
        Ok(())
    }

    async fn set_cargo_grip(&self, grip: bool) -> Result<(), DeliveryError> {
        let mut state = self.lock();
        state.commands.push(DriverCommand::Grip(grip));
        state.gripping = grip;
        Ok(())
    }

    async fn current_pose(&self) -> Result<Pose, DeliveryError> {
        Ok(self.lock().pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_drone() -> SimDrone {
        SimDrone::new().with_speedup(200.0).with_tick(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn takeoff_climbs_to_height() {
        let drone = fast_drone();
        drone.takeoff(0.5).await.unwrap();
        assert!(drone.is_airborne());
        let pose = drone.current_pose().await.unwrap();
        assert!((pose.position.z - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn move_reaches_target_exactly() {
        let drone = fast_drone();
        drone.takeoff(0.5).await.unwrap();
        let target = Point3::new(3.0, 4.0, 0.5);
        drone.move_to_position(target, 1.0).await.unwrap();
        assert_eq!(drone.current_pose().await.unwrap().position, target);
    }

    #[tokio::test]
    async fn move_while_landed_fails() {
        let drone = fast_drone();
        let err = drone
            .move_to_position(Point3::new(1.0, 0.0, 0.5), 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::VehicleCommand { .. }));
    }

    #[tokio::test]
    async fn invalid_speed_is_rejected() {
        let drone = fast_drone();
        drone.takeoff(0.5).await.unwrap();
        let err = drone
            .move_to_position(Point3::new(1.0, 0.0, 0.5), 0.0)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid speed"));
    }

    #[tokio::test]
    async fn injected_failure_hits_the_requested_move() {
        let drone = fast_drone().with_failure_on_move(2);
        drone.takeoff(0.5).await.unwrap();
        drone.move_to_position(Point3::new(1.0, 0.0, 0.5), 1.0).await.unwrap();
        let err = drone
            .move_to_position(Point3::new(2.0, 0.0, 0.5), 1.0)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("simulated flight controller fault"));
        // Position unchanged by the failed command.
        assert!((drone.current_pose().await.unwrap().position.x - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn land_touches_down_and_disarms() {
        let drone = fast_drone();
        drone.takeoff(0.5).await.unwrap();
        drone.land().await.unwrap();
        assert!(!drone.is_airborne());
        assert_eq!(drone.current_pose().await.unwrap().position.z, 0.0);
    }

    #[tokio::test]
    async fn grip_state_and_command_log() {
        let drone = fast_drone();
        drone.set_cargo_grip(true).await.unwrap();
        assert!(drone.is_gripping());
        drone.set_cargo_grip(false).await.unwrap();
        assert_eq!(
            drone.commands(),
            vec![DriverCommand::Grip(true), DriverCommand::Grip(false)]
        );
    }

    #[tokio::test]
    async fn pose_is_observable_mid_flight() {
        let drone = std::sync::Arc::new(
            SimDrone::new().with_speedup(1.0).with_tick(Duration::from_millis(5)),
        );
        drone.takeoff(0.01).await.unwrap();
        let mover = {
            let drone = drone.clone();
            tokio::spawn(async move {
                drone.move_to_position(Point3::new(10.0, 0.0, 0.01), 20.0).await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mid = drone.current_pose().await.unwrap().position.x;
        assert!(mid > 0.0 && mid < 10.0, "expected mid-flight x, got {mid}");
        mover.await.unwrap().unwrap();
    }
}
