//! `courier-nav` – Waypoint graph and route planning.
//!
//! # Modules
//!
//! - [`graph`] – [`WaypointGraph`][graph::WaypointGraph]: the immutable set
//!   of named waypoints, their 3-D positions and adjacency, loaded once from
//!   a JSON description.
//! - [`planner`] – [`find_path`][planner::find_path]: A* search over the
//!   graph using straight-line distance as both edge cost and heuristic.

pub mod graph;
pub mod planner;

pub use graph::{GraphError, Node, WaypointGraph};
pub use planner::{find_path, Route};
