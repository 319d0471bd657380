//! Service configuration – reads `~/.courier/config.toml` (or the path given
//! on the command line) and applies `COURIER_*` environment overrides.
//!
//! Every key is optional; a missing default file means "all defaults".
//!
//! ```toml
//! http_port = 5000
//! graph_path = "/etc/courier/graph.json"
//! poll_interval_ms = 100
//! broadcast_interval_ms = 100
//! sim_speedup = 1.0
//!
//! [delivery]
//! home_node = "P0"
//! home_pad = [0.0, 0.0]
//! pickup = [2.0, 0.0]
//! flight_height = 0.5
//! cruise_speed = 1.0
//! return_speed = 5.0
//! takeoff_settle_ms = 1000
//! cargo_hold_ms = 2000
//! completed_hold_ms = 2000
//! eta_interval_ms = 100
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use courier_runtime::DeliveryConfig;
use courier_types::Point3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port for the operator HTTP + WebSocket server.
    pub http_port: u16,
    /// Waypoint graph JSON; the built-in demo layout when unset.
    pub graph_path: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub broadcast_interval_ms: u64,
    /// Time scale for the simulated drone.
    pub sim_speedup: f64,
    pub delivery: DeliverySection,
}

/// `[delivery]` table; maps onto [`DeliveryConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySection {
    pub home_node: String,
    /// Ground position `[x, y]` of the landing pad.
    pub home_pad: [f64; 2],
    /// Ground position `[x, y]` of the pickup point.
    pub pickup: [f64; 2],
    pub flight_height: f64,
    pub cruise_speed: f64,
    pub return_speed: f64,
    pub takeoff_settle_ms: u64,
    pub cargo_hold_ms: u64,
    pub completed_hold_ms: u64,
    pub eta_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 5000,
            graph_path: None,
            poll_interval_ms: 100,
            broadcast_interval_ms: 100,
            sim_speedup: 1.0,
            delivery: DeliverySection::default(),
        }
    }
}

impl Default for DeliverySection {
    fn default() -> Self {
        Self {
            home_node: "P0".to_string(),
            home_pad: [0.0, 0.0],
            pickup: [2.0, 0.0],
            flight_height: 0.5,
            cruise_speed: 1.0,
            return_speed: 5.0,
            takeoff_settle_ms: 1000,
            cargo_hold_ms: 2000,
            completed_hold_ms: 2000,
            eta_interval_ms: 100,
        }
    }
}

impl Config {
    /// Build the runtime [`DeliveryConfig`].  Pad and pickup sit at the
    /// flight height.
    pub fn delivery_config(&self) -> DeliveryConfig {
        let d = &self.delivery;
        let h = d.flight_height;
        DeliveryConfig {
            home_node: d.home_node.clone(),
            home_pad: Point3::new(d.home_pad[0], d.home_pad[1], h),
            pickup: Point3::new(d.pickup[0], d.pickup[1], h),
            flight_height: h,
            cruise_speed: d.cruise_speed,
            return_speed: d.return_speed,
            takeoff_settle: Duration::from_millis(d.takeoff_settle_ms),
            cargo_hold: Duration::from_millis(d.cargo_hold_ms),
            completed_hold: Duration::from_millis(d.completed_hold_ms),
            eta_interval: Duration::from_millis(d.eta_interval_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 || self.broadcast_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll and broadcast intervals must be non-zero".to_string(),
            ));
        }
        if !(self.sim_speedup.is_finite() && self.sim_speedup > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "sim_speedup must be positive, got {}",
                self.sim_speedup
            )));
        }
        self.delivery_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

/// Return the path to `~/.courier/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".courier").join("config.toml")
}

/// Load the configuration.
///
/// An explicit `path` must exist.  Without one, `~/.courier/config.toml` is
/// used if present and defaults otherwise.  Environment overrides are
/// applied last.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut cfg = match path {
        Some(p) => read(p)?,
        None => {
            let default = config_path();
            if default.exists() {
                read(&default)?
            } else {
                Config::default()
            }
        }
    };
    apply_overrides(&mut cfg, |key| std::env::var(key).ok());
    cfg.validate()?;
    Ok(cfg)
}

pub(crate) fn read(path: &Path) -> Result<Config, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&raw)?)
}

/// Apply `COURIER_*` overrides looked up through `var`.
///
/// | Variable | Config field |
/// |---|---|
/// | `COURIER_HTTP_PORT` | `http_port` |
/// | `COURIER_GRAPH` | `graph_path` |
/// | `COURIER_HOME_NODE` | `delivery.home_node` |
/// | `COURIER_CRUISE_SPEED` | `delivery.cruise_speed` |
/// | `COURIER_SIM_SPEEDUP` | `sim_speedup` |
///
/// Unparseable numbers are ignored.
pub fn apply_overrides(cfg: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(port) = var("COURIER_HTTP_PORT").and_then(|v| v.trim().parse().ok()) {
        cfg.http_port = port;
    }
    if let Some(path) = var("COURIER_GRAPH").filter(|v| !v.trim().is_empty()) {
        cfg.graph_path = Some(PathBuf::from(path));
    }
    if let Some(node) = var("COURIER_HOME_NODE").filter(|v| !v.trim().is_empty()) {
        cfg.delivery.home_node = node.trim().to_string();
    }
    if let Some(speed) = var("COURIER_CRUISE_SPEED").and_then(|v| v.trim().parse().ok()) {
        cfg.delivery.cruise_speed = speed;
    }
    if let Some(speedup) = var("COURIER_SIM_SPEEDUP").and_then(|v| v.trim().parse().ok()) {
        cfg.sim_speedup = speedup;
    }
}
