//! [`WaypointGraph`] – the static flight network.
//!
//! Each [`Node`] is a named waypoint with a 3-D position and an ordered list
//! of neighbour ids.  Adjacency is directed as written: a route may step from
//! `a` to `b` only when `b` appears in `a`'s neighbour list.
//!
//! The graph is loaded once at startup and never mutated, so it can be shared
//! as `Arc<WaypointGraph>` and read from any task without locking.
//!
//! # Source format
//!
//! ```json
//! { "nodes": [
//!     { "id": "P0", "x": 0, "y": 0, "z": 0.5, "neighbors": ["P1"] },
//!     { "id": "P1", "x": 3, "y": 0, "neighbors": ["P0"] }
//! ] }
//! ```
//!
//! `z` is optional and defaults to the nominal flight height passed to the
//! loader.  Ids may be strings or integers.  A bare array of node records is
//! accepted as well.
//!
//! # Example
//!
//! ```rust
//! use courier_nav::graph::WaypointGraph;
//!
//! let graph = WaypointGraph::from_json(
//!     r#"[{"id":"A","x":0,"y":0,"neighbors":["B"]},
//!         {"id":"B","x":1,"y":0,"neighbors":["A"]}]"#,
//!     0.5,
//! ).unwrap();
//!
//! assert_eq!(graph.neighbors("A"), ["B".to_string()]);
//! assert_eq!(graph.position("B").unwrap().z, 0.5);
//! ```

use std::collections::HashMap;
use std::path::Path;

use courier_types::Point3;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

/// The demo network used when no graph file is configured.
const DEFAULT_GRAPH_JSON: &str = include_str!("default_graph.json");

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Errors raised while loading or querying a [`WaypointGraph`].
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Failed to read graph file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed graph description: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Graph description contains no nodes")]
    Empty,
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),
    #[error("Node {0} lists itself as a neighbour")]
    SelfReference(String),
    #[error("Unknown node: {0}")]
    UnknownNode(String),
}

// ────────────────────────────────────────────────────────────────────────────
// Raw (wire) records
// ────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct RawNode {
    id: RawId,
    x: f64,
    y: f64,
    z: Option<f64>,
    #[serde(default)]
    neighbors: Vec<RawId>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawGraph {
    Wrapped { nodes: Vec<RawNode> },
    Bare(Vec<RawNode>),
}

// ────────────────────────────────────────────────────────────────────────────
// Node / WaypointGraph
// ────────────────────────────────────────────────────────────────────────────

/// A named waypoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub position: Point3,
    /// Outgoing adjacency in source order.  May reference ids that are not in
    /// the graph; the planner skips those.
    pub neighbors: Vec<String>,
}

/// Immutable waypoint network.
#[derive(Debug, Clone)]
pub struct WaypointGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

impl WaypointGraph {
    /// Parse a graph from its JSON description.
    ///
    /// `nominal_height` is used for every node that omits `z`.
    ///
    /// # Errors
    ///
    /// [`GraphError::Malformed`] for invalid JSON or missing fields,
    /// [`GraphError::Empty`], [`GraphError::DuplicateNode`], or
    /// [`GraphError::SelfReference`].
    pub fn from_json(source: &str, nominal_height: f64) -> Result<Self, GraphError> {
        let raw_nodes = match serde_json::from_str::<RawGraph>(source)? {
            RawGraph::Wrapped { nodes } => nodes,
            RawGraph::Bare(nodes) => nodes,
        };
        if raw_nodes.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut nodes = Vec::with_capacity(raw_nodes.len());
        let mut index = HashMap::with_capacity(raw_nodes.len());
        for raw in raw_nodes {
            let id: String = raw.id.into();
            let mut neighbors: Vec<String> = Vec::with_capacity(raw.neighbors.len());
            for nb in raw.neighbors {
                let nb: String = nb.into();
                if nb == id {
                    return Err(GraphError::SelfReference(id));
                }
                if !neighbors.contains(&nb) {
                    neighbors.push(nb);
                }
            }
            if index.insert(id.clone(), nodes.len()).is_some() {
                return Err(GraphError::DuplicateNode(id));
            }
            nodes.push(Node {
                id,
                position: Point3::new(raw.x, raw.y, raw.z.unwrap_or(nominal_height)),
                neighbors,
            });
        }

        for node in &nodes {
            for nb in node.neighbors.iter().filter(|nb| !index.contains_key(*nb)) {
                warn!(node = %node.id, neighbor = %nb, "Dangling neighbour reference ignored");
            }
        }

        Ok(Self { nodes, index })
    }

    /// Read and parse a graph file.
    pub fn load(path: impl AsRef<Path>, nominal_height: f64) -> Result<Self, GraphError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| GraphError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let graph = Self::from_json(&raw, nominal_height)?;
        info!(path = %path.display(), nodes = graph.len(), "Waypoint graph loaded");
        Ok(graph)
    }

    /// The embedded demo network (`P0`..`P5` plus an unconnected `ISLAND`).
    pub fn default_layout(nominal_height: f64) -> Result<Self, GraphError> {
        Self::from_json(DEFAULT_GRAPH_JSON, nominal_height)
    }

    /// Outgoing neighbour ids of `id`; empty when `id` is unknown.
    pub fn neighbors(&self, id: &str) -> &[String] {
        self.node(id).map(|n| n.neighbors.as_slice()).unwrap_or(&[])
    }

    /// Position of `id`.
    pub fn position(&self, id: &str) -> Result<Point3, GraphError> {
        self.node(id)
            .map(|n| n.position)
            .ok_or_else(|| GraphError::UnknownNode(id.to_string()))
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Node ids in source order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // Index-based accessors for the planner.
    pub(crate) fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub(crate) fn node_at(&self, idx: usize) -> &Node {
        &self.nodes[idx]
    }
}
