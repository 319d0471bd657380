//! A* route planner over a [`WaypointGraph`].
//!
//! Edge cost is the 3-D Euclidean distance between connected waypoints and
//! the heuristic is the straight-line distance to the goal.  Because edge
//! costs are themselves Euclidean, the heuristic never overestimates and is
//! consistent, so the first time the goal is popped its path is optimal.
//!
//! Frontier ties (equal estimated total cost) are broken by insertion order.
//!
//! # Example
//!
//! ```rust
//! use courier_nav::{find_path, WaypointGraph};
//!
//! let graph = WaypointGraph::from_json(r#"[
//!     {"id":"P0","x":0,"y":0,"z":0,"neighbors":["P1"]},
//!     {"id":"P1","x":3,"y":0,"z":0,"neighbors":["P0","P2"]},
//!     {"id":"P2","x":3,"y":4,"z":0,"neighbors":["P1"]}
//! ]"#, 0.0).unwrap();
//!
//! let route = find_path(&graph, "P0", "P2").expect("reachable");
//! assert_eq!(route.nodes, ["P0", "P1", "P2"]);
//! assert!((route.cost - 7.0).abs() < 1e-9);
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tracing::debug;

use crate::graph::WaypointGraph;

/// A planned path: node ids from start to goal inclusive, and its length.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub nodes: Vec<String>,
    pub cost: f64,
}

impl Route {
    /// The same path travelled goal → start.
    pub fn reversed(&self) -> Route {
        Route {
            nodes: self.nodes.iter().rev().cloned().collect(),
            cost: self.cost,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Frontier entry.  `BinaryHeap` is a max-heap, so the ordering is reversed:
/// the lowest estimate (then the earliest `seq`) compares greatest.
struct Frontier {
    estimate: f64,
    seq: u64,
    node: usize,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .estimate
            .total_cmp(&self.estimate)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Find the lowest-cost path from `start` to `goal`.
///
/// Returns `None` when no path exists or when either endpoint is not in the
/// graph.  Neighbour ids missing from the graph are skipped.  The search is
/// bounded by the node count: every node is expanded at most once.
pub fn find_path(graph: &WaypointGraph, start: &str, goal: &str) -> Option<Route> {
    let (Some(start_idx), Some(goal_idx)) = (graph.index_of(start), graph.index_of(goal)) else {
        debug!(start, goal, "Route endpoint not in graph");
        return None;
    };
    let goal_pos = graph.node_at(goal_idx).position;
    let heuristic = |idx: usize| graph.node_at(idx).position.distance_to(&goal_pos);

    let n = graph.len();
    let mut best_cost = vec![f64::INFINITY; n];
    let mut came_from: Vec<Option<usize>> = vec![None; n];
    let mut closed = vec![false; n];
    let mut open = BinaryHeap::new();
    let mut seq = 0u64;

    best_cost[start_idx] = 0.0;
    open.push(Frontier {
        estimate: heuristic(start_idx),
        seq,
        node: start_idx,
    });

    while let Some(Frontier { node, .. }) = open.pop() {
        if closed[node] {
            continue;
        }
        if node == goal_idx {
            return Some(reconstruct(graph, &came_from, goal_idx, best_cost[goal_idx]));
        }
        closed[node] = true;

        let here = graph.node_at(node);
        for neighbor in &here.neighbors {
            let Some(next) = graph.index_of(neighbor) else {
                continue;
            };
            if closed[next] {
                continue;
            }
            let tentative = best_cost[node] + here.position.distance_to(&graph.node_at(next).position);
            if tentative < best_cost[next] {
                best_cost[next] = tentative;
                came_from[next] = Some(node);
                seq += 1;
                open.push(Frontier {
                    estimate: tentative + heuristic(next),
                    seq,
                    node: next,
                });
            }
        }
    }

    debug!(start, goal, "Frontier exhausted; goal unreachable");
    None
}

fn reconstruct(
    graph: &WaypointGraph,
    came_from: &[Option<usize>],
    goal_idx: usize,
    cost: f64,
) -> Route {
    let mut nodes = vec![graph.node_at(goal_idx).id.clone()];
    let mut cursor = goal_idx;
    while let Some(prev) = came_from[cursor] {
        nodes.push(graph.node_at(prev).id.clone());
        cursor = prev;
    }
    nodes.reverse();
    Route { nodes, cost }
}
