//! Core types for pipeline graphs
//!
//! A pipeline is a map of named nodes plus an ordered list of connections.
//! Pins are declared per node kind (see `pins`), so connections refer to
//! them by name only.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::state::NodeState;

/// Unique name of a node within a pipeline
pub type NodeId = String;

/// Identity key of a connection (`from.pin->to.pin`)
pub type ConnectionKey = String;

/// Delivery semantics requested for a connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// Backpressure is applied; packets are never dropped
    #[default]
    Reliable,
    /// Packets may be dropped when the downstream is slow
    BestEffort,
}

impl ConnectionMode {
    pub fn is_default(&self) -> bool {
        *self == Self::Reliable
    }
}

/// A directed edge between an output pin and an input pin
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub from_node: NodeId,
    pub from_pin: String,
    pub to_node: NodeId,
    pub to_pin: String,
    #[serde(default, skip_serializing_if = "ConnectionMode::is_default")]
    pub mode: ConnectionMode,
}

impl Connection {
    /// Create a reliable connection
    pub fn new(
        from_node: impl Into<String>,
        from_pin: impl Into<String>,
        to_node: impl Into<String>,
        to_pin: impl Into<String>,
    ) -> Self {
        Self {
            from_node: from_node.into(),
            from_pin: from_pin.into(),
            to_node: to_node.into(),
            to_pin: to_pin.into(),
            mode: ConnectionMode::Reliable,
        }
    }

    pub fn with_mode(mut self, mode: ConnectionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Identity key; the mode is not part of it
    pub fn key(&self) -> ConnectionKey {
        format!(
            "{}.{}->{}.{}",
            self.from_node, self.from_pin, self.to_node, self.to_pin
        )
    }

    /// Whether either endpoint is `node_id`
    pub fn touches(&self, node_id: &str) -> bool {
        self.from_node == node_id || self.to_node == node_id
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// A processing node instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Catalog kind (e.g. "audio::gain")
    pub kind: String,
    /// Free-form parameters, checked against the kind's schema
    #[serde(default = "empty_params")]
    pub params: serde_json::Value,
    /// Last lifecycle state reported by the runtime
    #[serde(default)]
    pub state: NodeState,
}

fn empty_params() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Node {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: empty_params(),
            state: NodeState::default(),
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_state(mut self, state: NodeState) -> Self {
        self.state = state;
        self
    }
}

/// Canvas position of a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NodePosition {
    pub x: f64,
    pub y: f64,
}

impl NodePosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A pipeline graph
///
/// Every connection must reference nodes present in `nodes`. A committed
/// pipeline must additionally be acyclic; drafts may not be.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: BTreeMap<NodeId, Node>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_node(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    /// Find a connection by identity key
    pub fn connection(&self, key: &str) -> Option<&Connection> {
        self.connections.iter().find(|c| c.key() == key)
    }

    pub fn contains_connection(&self, key: &str) -> bool {
        self.connection(key).is_some()
    }

    /// All identity keys, sorted
    pub fn connection_keys(&self) -> BTreeSet<ConnectionKey> {
        self.connections.iter().map(Connection::key).collect()
    }

    /// Connections feeding `node_id`
    pub fn incoming<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.to_node == node_id)
    }

    /// Connections leaving `node_id`
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.from_node == node_id)
    }
}
