//! Runtime channel seam
//!
//! The live runtime is the only place commits and tunes take effect. The
//! engine reaches it through `RuntimeChannel`; the transport behind it
//! (request/response, websocket, in-process) is the implementor's concern.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::commit::{BatchOperation, BatchResult};
use crate::error::{Result, StagingError};
use crate::types::{Connection, Node, Pipeline};

/// Connection to the live runtime for one or more targets
#[async_trait]
pub trait RuntimeChannel: Send + Sync {
    /// Current live pipeline of `target`
    async fn snapshot(&self, target: &str) -> Result<Pipeline>;

    /// Apply a batch atomically
    ///
    /// A transport failure is an `Err`; a refusal by the runtime is an
    /// `Ok(BatchResult { success: false, .. })`.
    async fn batch_apply(&self, target: &str, operations: Vec<BatchOperation>) -> Result<BatchResult>;

    /// Change one parameter of a running node
    async fn tune(
        &self,
        target: &str,
        node_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<()>;
}

/// In-memory runtime that applies batches to plain pipelines
///
/// A batch is applied to a copy and swapped in only if every operation
/// succeeds.
#[derive(Default)]
pub struct MemoryRuntime {
    pipelines: Mutex<HashMap<String, Pipeline>>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, target: impl Into<String>, pipeline: Pipeline) {
        self.pipelines.lock().insert(target.into(), pipeline);
    }

    pub fn pipeline(&self, target: &str) -> Option<Pipeline> {
        self.pipelines.lock().get(target).cloned()
    }
}

fn apply_operation(pipeline: &mut Pipeline, op: BatchOperation) -> std::result::Result<(), String> {
    match op {
        BatchOperation::AddNode {
            node_id,
            kind,
            params,
        } => {
            if pipeline.contains_node(&node_id) {
                return Err(format!("add_node: '{}' already exists", node_id));
            }
            pipeline.nodes.insert(node_id, Node::new(kind).with_params(params));
        }
        BatchOperation::RemoveNode { node_id } => {
            if pipeline.nodes.remove(&node_id).is_none() {
                return Err(format!("remove_node: '{}' not found", node_id));
            }
            pipeline.connections.retain(|c| !c.touches(&node_id));
        }
        BatchOperation::Connect {
            from_node,
            from_pin,
            to_node,
            to_pin,
            mode,
        } => {
            let conn = Connection::new(from_node, from_pin, to_node, to_pin).with_mode(mode);
            for endpoint in [&conn.from_node, &conn.to_node] {
                if !pipeline.contains_node(endpoint) {
                    return Err(format!("connect: node '{}' not found", endpoint));
                }
            }
            if pipeline.contains_connection(&conn.key()) {
                return Err(format!("connect: {} already exists", conn.key()));
            }
            pipeline.connections.push(conn);
        }
        BatchOperation::Disconnect {
            from_node,
            from_pin,
            to_node,
            to_pin,
        } => {
            let key = Connection::new(from_node, from_pin, to_node, to_pin).key();
            let before = pipeline.connections.len();
            pipeline.connections.retain(|c| c.key() != key);
            // Removing a node already drops its connections.
            if before == pipeline.connections.len() {
                log::debug!("disconnect: {} was already gone", key);
            }
        }
        BatchOperation::UpdateParams { node_id, params } => {
            let node = pipeline
                .nodes
                .get_mut(&node_id)
                .ok_or_else(|| format!("update_params: '{}' not found", node_id))?;
            node.params = params;
        }
    }
    Ok(())
}

#[async_trait]
impl RuntimeChannel for MemoryRuntime {
    async fn snapshot(&self, target: &str) -> Result<Pipeline> {
        self.pipeline(target)
            .ok_or_else(|| StagingError::UnknownTarget(target.to_string()))
    }

    async fn batch_apply(&self, target: &str, operations: Vec<BatchOperation>) -> Result<BatchResult> {
        let mut pipelines = self.pipelines.lock();
        let current = pipelines
            .get(target)
            .ok_or_else(|| StagingError::UnknownTarget(target.to_string()))?;

        let mut next = current.clone();
        let mut errors = Vec::new();
        for (index, op) in operations.into_iter().enumerate() {
            if let Err(message) = apply_operation(&mut next, op) {
                errors.push(format!("operation {}: {}", index, message));
            }
        }

        if errors.is_empty() {
            pipelines.insert(target.to_string(), next);
            Ok(BatchResult::ok())
        } else {
            log::warn!("Batch for '{}' rejected: {}", target, errors.join("; "));
            Ok(BatchResult::failed(errors))
        }
    }

    async fn tune(
        &self,
        target: &str,
        node_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let mut pipelines = self.pipelines.lock();
        let pipeline = pipelines
            .get_mut(target)
            .ok_or_else(|| StagingError::UnknownTarget(target.to_string()))?;
        let node = pipeline
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| StagingError::UnknownNode(node_id.to_string()))?;

        match node.params.as_object_mut() {
            Some(map) => {
                map.insert(key.to_string(), value);
            }
            None => {
                let mut map = serde_json::Map::new();
                map.insert(key.to_string(), value);
                node.params = serde_json::Value::Object(map);
            }
        }
        Ok(())
    }
}
