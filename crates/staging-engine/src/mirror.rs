//! Runtime state mirror
//!
//! Keeps a local copy of the live pipeline up to date from asynchronous
//! runtime events, independent of staging. Ingestion is idempotent and
//! merge-only: a state, stats or params update touches one node and is
//! reported as `MirrorUpdate::StateOnly`; only a change in node or
//! connection membership (seen through the structural signature) is
//! reported as `MirrorUpdate::Structural`.
//!
//! For nodes degraded by `slow_input_timeout`, the mirror maps each slow
//! pin back to the connection feeding it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::constants::limits;
use crate::events::{EventSink, StagingEvent};
use crate::state::NodeState;
use crate::types::{Connection, ConnectionKey, Node, NodeId, Pipeline};

/// Per-node packet counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    pub received: u64,
    pub sent: u64,
    pub discarded: u64,
    pub errored: u64,
    pub duration_secs: f64,
}

/// Events pushed by the live runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RuntimeEvent {
    NodeStateChanged {
        node_id: NodeId,
        state: NodeState,
    },
    NodeStatsUpdated {
        node_id: NodeId,
        stats: NodeStats,
    },
    NodeParamsChanged {
        node_id: NodeId,
        params: serde_json::Value,
    },
    NodeAdded {
        node_id: NodeId,
        kind: String,
        #[serde(default)]
        params: serde_json::Value,
    },
    NodeRemoved {
        node_id: NodeId,
    },
    ConnectionAdded {
        connection: Connection,
    },
    ConnectionRemoved {
        connection: Connection,
    },
    /// Full resync, e.g. after reconnecting
    Snapshot {
        pipeline: Pipeline,
    },
}

/// What an ingested event changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorUpdate {
    None,
    StateOnly,
    Structural,
}

/// Upstream connection feeding a slow input
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DegradedCause {
    pub pin: String,
    pub from_node: NodeId,
    pub from_pin: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeHealth {
    Healthy,
    /// Feeds a slow input of a degraded node
    Slow,
}

/// Sorted `name:kind` pairs and sorted connection keys
pub fn structural_signature(pipeline: &Pipeline) -> String {
    // BTreeMap keys and BTreeSet keys are already sorted
    let nodes: Vec<String> = pipeline
        .nodes
        .iter()
        .map(|(id, node)| format!("{}:{}", id, node.kind))
        .collect();
    let connections: Vec<ConnectionKey> = pipeline.connection_keys().into_iter().collect();
    format!("{}|{}", nodes.join(","), connections.join(","))
}

/// Local copy of one target's live pipeline and node health
#[derive(Debug, Clone)]
pub struct RuntimeStateMirror {
    target: String,
    pipeline: Pipeline,
    stats: HashMap<NodeId, NodeStats>,
    state_since: HashMap<NodeId, DateTime<Utc>>,
    signature: String,
}

impl RuntimeStateMirror {
    pub fn new(target: impl Into<String>, pipeline: Pipeline) -> Self {
        let signature = structural_signature(&pipeline);
        Self {
            target: target.into(),
            pipeline,
            stats: HashMap::new(),
            state_since: HashMap::new(),
            signature,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn node_state(&self, node_id: &str) -> Option<&NodeState> {
        self.pipeline.node(node_id).map(|n| &n.state)
    }

    pub fn stats(&self, node_id: &str) -> Option<&NodeStats> {
        self.stats.get(node_id)
    }

    /// When the node entered its current state, if observed
    pub fn state_since(&self, node_id: &str) -> Option<DateTime<Utc>> {
        self.state_since.get(node_id).copied()
    }

    /// Ingest one runtime event
    pub fn apply_event(&mut self, event: RuntimeEvent) -> MirrorUpdate {
        match event {
            RuntimeEvent::NodeStateChanged { node_id, state } => self.apply_state(&node_id, state),
            RuntimeEvent::NodeStatsUpdated { node_id, stats } => {
                if !self.pipeline.contains_node(&node_id) || self.stats.get(&node_id) == Some(&stats) {
                    return MirrorUpdate::None;
                }
                self.stats.insert(node_id, stats);
                MirrorUpdate::StateOnly
            }
            RuntimeEvent::NodeParamsChanged { node_id, params } => {
                match self.pipeline.nodes.get_mut(&node_id) {
                    Some(node) if node.params != params => {
                        node.params = params;
                        MirrorUpdate::StateOnly
                    }
                    _ => MirrorUpdate::None,
                }
            }
            RuntimeEvent::NodeAdded {
                node_id,
                kind,
                params,
            } => {
                let fresh = match self.pipeline.node(&node_id) {
                    Some(existing) => existing.kind != kind,
                    None => true,
                };
                if fresh {
                    // A re-added node starts a new lifecycle
                    self.stats.remove(&node_id);
                    self.state_since.remove(&node_id);
                    self.pipeline
                        .nodes
                        .insert(node_id, Node::new(kind).with_params(params));
                }
                self.refresh_signature()
            }
            RuntimeEvent::NodeRemoved { node_id } => {
                self.pipeline.nodes.remove(&node_id);
                self.pipeline.connections.retain(|c| !c.touches(&node_id));
                self.stats.remove(&node_id);
                self.state_since.remove(&node_id);
                self.refresh_signature()
            }
            RuntimeEvent::ConnectionAdded { connection } => {
                if !self.pipeline.contains_connection(&connection.key()) {
                    self.pipeline.connections.push(connection);
                }
                self.refresh_signature()
            }
            RuntimeEvent::ConnectionRemoved { connection } => {
                let key = connection.key();
                self.pipeline.connections.retain(|c| c.key() != key);
                self.refresh_signature()
            }
            RuntimeEvent::Snapshot { pipeline } => {
                let same_content = pipeline == self.pipeline;
                self.pipeline = pipeline;
                self.stats.retain(|id, _| self.pipeline.nodes.contains_key(id));
                self.state_since.retain(|id, _| self.pipeline.nodes.contains_key(id));
                match self.refresh_signature() {
                    MirrorUpdate::None if same_content => MirrorUpdate::None,
                    MirrorUpdate::None => MirrorUpdate::StateOnly,
                    structural => structural,
                }
            }
        }
    }

    fn apply_state(&mut self, node_id: &str, state: NodeState) -> MirrorUpdate {
        let Some(node) = self.pipeline.nodes.get_mut(node_id) else {
            log::debug!("[{}] state for unknown node '{}' ignored", self.target, node_id);
            return MirrorUpdate::None;
        };
        if node.state == state {
            return MirrorUpdate::None;
        }
        if !node.state.can_transition_to(&state) {
            log::warn!(
                "[{}] ignoring transition of '{}' from {} to {}",
                self.target,
                node_id,
                node.state,
                state
            );
            return MirrorUpdate::None;
        }
        node.state = state;
        self.state_since.insert(node_id.to_string(), Utc::now());
        MirrorUpdate::StateOnly
    }

    fn refresh_signature(&mut self) -> MirrorUpdate {
        let next = structural_signature(&self.pipeline);
        if next == self.signature {
            MirrorUpdate::None
        } else {
            self.signature = next;
            MirrorUpdate::Structural
        }
    }

    /// Upstream connections feeding the slow pins of a degraded node
    ///
    /// Sorted by pin name, then source node. Empty unless the node is
    /// degraded with `slow_input_timeout`.
    pub fn degraded_causes(&self, node_id: &str) -> Vec<DegradedCause> {
        let Some(details) = self
            .node_state(node_id)
            .and_then(NodeState::slow_input_details)
        else {
            return Vec::new();
        };

        let mut causes: Vec<DegradedCause> = self
            .pipeline
            .incoming(node_id)
            .filter(|c| details.slow_pins.contains(&c.to_pin))
            .map(|c| DegradedCause {
                pin: c.to_pin.clone(),
                from_node: c.from_node.clone(),
                from_pin: c.from_pin.clone(),
            })
            .collect();
        causes.sort();
        causes
    }

    /// Health of every connection
    pub fn edge_health(&self) -> BTreeMap<ConnectionKey, EdgeHealth> {
        let mut health: BTreeMap<ConnectionKey, EdgeHealth> = self
            .pipeline
            .connections
            .iter()
            .map(|c| (c.key(), EdgeHealth::Healthy))
            .collect();

        for node_id in self.pipeline.nodes.keys() {
            for cause in self.degraded_causes(node_id) {
                let key = Connection::new(&cause.from_node, &cause.from_pin, node_id, &cause.pin).key();
                health.insert(key, EdgeHealth::Slow);
            }
        }
        health
    }
}

/// Shared mirror fed by a background ingestion task
///
/// Readers take a short read lock; the ingestion task never waits on the
/// staging registry.
#[derive(Clone)]
pub struct MirrorHandle {
    mirror: Arc<RwLock<RuntimeStateMirror>>,
    tx: mpsc::Sender<RuntimeEvent>,
}

impl MirrorHandle {
    /// Start ingesting events for `mirror` on a tokio task
    pub fn spawn(mirror: RuntimeStateMirror, sink: Arc<dyn EventSink>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<RuntimeEvent>(limits::EVENT_CHANNEL_CAPACITY);
        let mirror = Arc::new(RwLock::new(mirror));
        let shared = Arc::clone(&mirror);

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let state_node = match &event {
                    RuntimeEvent::NodeStateChanged { node_id, .. } => Some(node_id.clone()),
                    _ => None,
                };

                let (update, target, notice) = {
                    let mut guard = shared.write();
                    let update = guard.apply_event(event);
                    let target = guard.target().to_string();
                    let notice = match (update, &state_node) {
                        (MirrorUpdate::Structural, _) => Some(StagingEvent::StructureChanged {
                            target: target.clone(),
                            signature: guard.signature().to_string(),
                        }),
                        (MirrorUpdate::StateOnly, Some(node_id)) => {
                            guard.node_state(node_id).map(|state| StagingEvent::NodeStateChanged {
                                target: target.clone(),
                                node_id: node_id.clone(),
                                state: state.clone(),
                            })
                        }
                        _ => None,
                    };
                    (update, target, notice)
                };

                if let Some(notice) = notice {
                    if let Err(e) = sink.send(notice) {
                        log::warn!("[{}] failed to forward mirror event: {}", target, e);
                    }
                }
                if update == MirrorUpdate::Structural {
                    log::info!("[{}] live structure changed", target);
                }
            }
            log::debug!("Runtime event channel closed");
        });

        (Self { mirror, tx }, task)
    }

    /// Sender for the runtime transport to push events into
    pub fn sender(&self) -> mpsc::Sender<RuntimeEvent> {
        self.tx.clone()
    }

    /// Read the mirror under a short lock
    pub fn read<R>(&self, f: impl FnOnce(&RuntimeStateMirror) -> R) -> R {
        f(&self.mirror.read())
    }

    /// Copy of the live pipeline
    pub fn pipeline(&self) -> Pipeline {
        self.mirror.read().pipeline().clone()
    }
}
