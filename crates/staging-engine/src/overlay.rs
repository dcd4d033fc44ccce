//! Copy-on-write staging overlay
//!
//! An overlay pairs the pipeline captured when staging began (`original`)
//! with an editable draft (`staged`) and a change log holding the *net*
//! pending edits between them. Opposite edits cancel instead of piling up:
//!
//! - adding then removing a node that never reached the runtime leaves no trace
//! - removing a live connection and adding it back cancels the removal
//! - a param edit that returns to the original value drops its entry
//!
//! Both pipelines sit behind `Arc`. Mutators go through `Arc::make_mut`, so
//! a snapshot handed out earlier (to a reader, a commit or the undo stack)
//! is never changed underneath its holder.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::NodeCatalog;
use crate::config::LayoutConfig;
use crate::error::{Result, StagingError};
use crate::packet::PacketTypeMeta;
use crate::params::params_equal;
use crate::topology;
use crate::types::{Connection, ConnectionKey, Node, NodeId, NodePosition, Pipeline};
use crate::validation::{self, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    AddNode,
    RemoveNode,
    AddConnection,
    RemoveConnection,
    UpdateParams,
}

/// One net pending edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedChange {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<Connection>,
    pub timestamp: DateTime<Utc>,
}

impl StagedChange {
    fn node(change_type: ChangeType, node_id: &str) -> Self {
        Self {
            change_type,
            node_id: Some(node_id.to_string()),
            connection: None,
            timestamp: Utc::now(),
        }
    }

    fn connection(change_type: ChangeType, conn: &Connection) -> Self {
        Self {
            change_type,
            node_id: None,
            connection: Some(conn.clone()),
            timestamp: Utc::now(),
        }
    }

    fn is_for_node(&self, change_type: ChangeType, node_id: &str) -> bool {
        self.change_type == change_type && self.node_id.as_deref() == Some(node_id)
    }

    fn is_for_connection(&self, change_type: ChangeType, key: &str) -> bool {
        self.change_type == change_type
            && self.connection.as_ref().is_some_and(|c| c.key() == key)
    }
}

/// Counts of pending edits by direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesSummary {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

impl ChangesSummary {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.modified == 0
    }
}

/// Editable draft of one target's pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingOverlay {
    target: String,
    /// Fresh per overlay instance; late results carrying another epoch are dropped
    epoch: Uuid,
    original: Arc<Pipeline>,
    staged: Arc<Pipeline>,
    staged_node_ids: BTreeSet<NodeId>,
    staged_connection_keys: BTreeSet<ConnectionKey>,
    node_positions: BTreeMap<NodeId, NodePosition>,
    change_log: Vec<StagedChange>,
    validation_errors: Vec<ValidationError>,
    version: u64,
}

impl StagingOverlay {
    /// Begin staging on a snapshot of the live pipeline
    pub fn enter(target: impl Into<String>, original: Pipeline) -> Self {
        let original = Arc::new(original);
        Self {
            target: target.into(),
            epoch: Uuid::new_v4(),
            staged: Arc::clone(&original),
            original,
            staged_node_ids: BTreeSet::new(),
            staged_connection_keys: BTreeSet::new(),
            node_positions: BTreeMap::new(),
            change_log: Vec::new(),
            validation_errors: Vec::new(),
            version: 0,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn epoch(&self) -> Uuid {
        self.epoch
    }

    pub fn original(&self) -> &Arc<Pipeline> {
        &self.original
    }

    pub fn staged(&self) -> &Arc<Pipeline> {
        &self.staged
    }

    pub fn staged_node_ids(&self) -> &BTreeSet<NodeId> {
        &self.staged_node_ids
    }

    pub fn staged_connection_keys(&self) -> &BTreeSet<ConnectionKey> {
        &self.staged_connection_keys
    }

    pub fn node_positions(&self) -> &BTreeMap<NodeId, NodePosition> {
        &self.node_positions
    }

    pub fn change_log(&self) -> &[StagedChange] {
        &self.change_log
    }

    pub fn validation_errors(&self) -> &[ValidationError] {
        &self.validation_errors
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether nothing is pending
    pub fn is_clean(&self) -> bool {
        self.change_log.is_empty()
    }

    fn bump(&mut self) {
        self.version += 1;
    }

    /// Add a node to the draft
    ///
    /// A node that was live at entry and removed this session is restored
    /// instead: the pending removal is cancelled and its live connections
    /// come back with it. Re-adding a removed live id under a different
    /// kind stages a replacement; the removal stays pending next to the add.
    pub fn add_node(&mut self, node_id: &str, node: Node) -> Result<()> {
        if self.staged.contains_node(node_id) {
            return Err(StagingError::DuplicateNode(node_id.to_string()));
        }

        match self.original.node(node_id) {
            Some(live) if live.kind == node.kind => {
                let params = node.params.clone();
                Arc::make_mut(&mut self.staged)
                    .nodes
                    .insert(node_id.to_string(), node);
                self.change_log
                    .retain(|c| !c.is_for_node(ChangeType::RemoveNode, node_id));
                self.sync_params_entry(node_id, &params);
                self.reattach_live_connections(node_id);
                log::debug!("[{}] restored live node '{}'", self.target, node_id);
            }
            live => {
                Arc::make_mut(&mut self.staged)
                    .nodes
                    .insert(node_id.to_string(), node);
                self.staged_node_ids.insert(node_id.to_string());
                self.change_log
                    .push(StagedChange::node(ChangeType::AddNode, node_id));
                if live.is_some() {
                    log::debug!("[{}] staged replacement for '{}'", self.target, node_id);
                } else {
                    log::debug!("[{}] staged node '{}'", self.target, node_id);
                }
            }
        }

        self.bump();
        Ok(())
    }

    /// Put back live connections of a restored node that went away with it
    fn reattach_live_connections(&mut self, node_id: &str) {
        let restorable: Vec<Connection> = self
            .original
            .connections
            .iter()
            .filter(|c| c.touches(node_id))
            .filter(|c| {
                let key = c.key();
                !self.staged.contains_connection(&key)
                    && !self
                        .change_log
                        .iter()
                        .any(|change| change.is_for_connection(ChangeType::RemoveConnection, &key))
                    && [&c.from_node, &c.to_node]
                        .into_iter()
                        .all(|endpoint| self.is_live_instance(endpoint))
            })
            .cloned()
            .collect();
        if !restorable.is_empty() {
            Arc::make_mut(&mut self.staged)
                .connections
                .extend(restorable);
        }
    }

    /// Whether `node_id` in the draft is the same node that was live at entry
    fn is_live_instance(&self, node_id: &str) -> bool {
        match (self.original.node(node_id), self.staged.node(node_id)) {
            (Some(live), Some(staged)) => {
                live.kind == staged.kind && !self.staged_node_ids.contains(node_id)
            }
            _ => false,
        }
    }

    /// Remove a node and every connection touching it
    ///
    /// Live connections go with the node without entries of their own; the
    /// node's `remove_node` entry covers them. Staged connections touching
    /// it are dropped along with their `add_connection` entries.
    pub fn remove_node(&mut self, node_id: &str) -> Result<()> {
        if !self.staged.contains_node(node_id) {
            return Err(StagingError::UnknownNode(node_id.to_string()));
        }

        let touching: Vec<ConnectionKey> = self
            .staged
            .connections
            .iter()
            .filter(|c| c.touches(node_id))
            .map(Connection::key)
            .collect();
        for key in &touching {
            if self.staged_connection_keys.remove(key) {
                self.change_log
                    .retain(|c| !c.is_for_connection(ChangeType::AddConnection, key));
            }
        }

        let staged = Arc::make_mut(&mut self.staged);
        staged.connections.retain(|c| !c.touches(node_id));
        staged.nodes.remove(node_id);
        self.node_positions.remove(node_id);
        self.change_log
            .retain(|c| !c.is_for_node(ChangeType::UpdateParams, node_id));

        if self.staged_node_ids.remove(node_id) {
            // Never reached the runtime: net zero
            self.change_log
                .retain(|c| !c.is_for_node(ChangeType::AddNode, node_id));
            log::debug!("[{}] dropped staged node '{}'", self.target, node_id);
        } else {
            self.change_log
                .push(StagedChange::node(ChangeType::RemoveNode, node_id));
            log::debug!("[{}] marked live node '{}' for removal", self.target, node_id);
        }

        self.bump();
        Ok(())
    }

    /// Add an already-checked connection to the draft
    pub fn add_connection(&mut self, conn: Connection) -> Result<()> {
        let key = conn.key();
        if self.staged.contains_connection(&key) {
            return Err(StagingError::ConnectionRejected(
                crate::compat::ConnectionRejection::Duplicate(key),
            ));
        }
        for endpoint in [&conn.from_node, &conn.to_node] {
            if !self.staged.contains_node(endpoint) {
                return Err(StagingError::UnknownNode(endpoint.clone()));
            }
        }

        let before = self.change_log.len();
        if self.is_live_instance(&conn.from_node) && self.is_live_instance(&conn.to_node) {
            self.change_log
                .retain(|c| !c.is_for_connection(ChangeType::RemoveConnection, &key));
        }
        if self.change_log.len() == before {
            self.staged_connection_keys.insert(key.clone());
            self.change_log
                .push(StagedChange::connection(ChangeType::AddConnection, &conn));
            log::debug!("[{}] staged connection {}", self.target, key);
        } else {
            log::debug!("[{}] cancelled pending removal of {}", self.target, key);
        }

        Arc::make_mut(&mut self.staged).connections.push(conn);
        self.bump();
        Ok(())
    }

    /// Remove a connection from the draft by identity key
    pub fn remove_connection(&mut self, key: &str) -> Result<()> {
        let conn = self
            .staged
            .connection(key)
            .cloned()
            .ok_or_else(|| StagingError::UnknownConnection(key.to_string()))?;
        self.detach_connection(&conn);
        self.bump();
        Ok(())
    }

    fn detach_connection(&mut self, conn: &Connection) {
        let key = conn.key();
        Arc::make_mut(&mut self.staged)
            .connections
            .retain(|c| c.key() != key);

        if self.staged_connection_keys.remove(&key) {
            self.change_log
                .retain(|c| !c.is_for_connection(ChangeType::AddConnection, &key));
        } else {
            self.change_log
                .push(StagedChange::connection(ChangeType::RemoveConnection, conn));
        }
    }

    /// Commit a coalesced param value to the draft
    ///
    /// `params` is the node's complete new params value. The change log
    /// holds at most one `update_params` entry per node, and none when the
    /// value equals the params captured at entry.
    pub fn apply_params(&mut self, node_id: &str, params: serde_json::Value) -> Result<()> {
        let staged = Arc::make_mut(&mut self.staged);
        let node = staged
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| StagingError::UnknownNode(node_id.to_string()))?;
        node.params = params.clone();

        self.sync_params_entry(node_id, &params);
        self.bump();
        Ok(())
    }

    fn sync_params_entry(&mut self, node_id: &str, params: &serde_json::Value) {
        let unchanged = self.is_live_instance(node_id)
            && self
                .original
                .node(node_id)
                .is_some_and(|live| params_equal(&live.params, params));
        let has_entry = self
            .change_log
            .iter()
            .any(|c| c.is_for_node(ChangeType::UpdateParams, node_id));

        if unchanged {
            self.change_log
                .retain(|c| !c.is_for_node(ChangeType::UpdateParams, node_id));
        } else if !has_entry {
            self.change_log
                .push(StagedChange::node(ChangeType::UpdateParams, node_id));
        }
    }

    /// Move a node on the canvas; not a pipeline change
    pub fn set_position(&mut self, node_id: &str, position: NodePosition) {
        self.node_positions.insert(node_id.to_string(), position);
    }

    /// Recompute positions for the whole draft
    pub fn auto_layout(&mut self, measured: &HashMap<NodeId, (f64, f64)>, config: &LayoutConfig) {
        self.node_positions = topology::auto_layout(&self.staged, measured, config);
    }

    /// Re-run validation over the draft
    pub fn revalidate(&mut self, catalog: &NodeCatalog, registry: &[PacketTypeMeta]) -> &[ValidationError] {
        self.validation_errors = validation::validate_pipeline(&self.staged, catalog, registry);
        &self.validation_errors
    }

    /// Replace the draft with `next` through the regular mutators
    ///
    /// Runs against a copy; on error `self` is untouched.
    pub fn replace_staged(&mut self, next: Pipeline) -> Result<()> {
        let mut draft = self.clone();

        // Nodes first so their live connections leave without entries
        let stale_nodes: Vec<NodeId> = draft
            .staged
            .nodes
            .iter()
            .filter(|(id, node)| next.node(id).map_or(true, |n| n.kind != node.kind))
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale_nodes {
            draft.remove_node(&id)?;
        }

        for (id, node) in &next.nodes {
            match draft.staged.node(id) {
                None => {
                    draft.add_node(id, node.clone())?;
                }
                Some(existing) if !params_equal(&existing.params, &node.params) => {
                    draft.apply_params(id, node.params.clone())?;
                }
                Some(_) => {}
            }
        }

        // Restored nodes bring back their live connections, so this runs after
        let stale_keys: Vec<ConnectionKey> = draft
            .staged
            .connections
            .iter()
            .map(Connection::key)
            .filter(|key| !next.contains_connection(key))
            .collect();
        for key in stale_keys {
            draft.remove_connection(&key)?;
        }

        for conn in &next.connections {
            if !draft.staged.contains_connection(&conn.key()) {
                draft.add_connection(conn.clone())?;
            }
        }

        {
            let staged = Arc::make_mut(&mut draft.staged);
            staged.name = next.name.clone();
            staged.description = next.description.clone();
        }

        *self = draft;
        Ok(())
    }

    /// Re-apply cached editor data from a previous session
    pub fn apply_cached(
        &mut self,
        positions: BTreeMap<NodeId, NodePosition>,
        staged_node_ids: BTreeSet<NodeId>,
        staged_connection_keys: BTreeSet<ConnectionKey>,
    ) {
        self.node_positions.extend(positions);
        self.staged_node_ids.extend(
            staged_node_ids
                .into_iter()
                .filter(|id| !self.original.contains_node(id)),
        );
        self.staged_connection_keys.extend(
            staged_connection_keys
                .into_iter()
                .filter(|key| !self.original.contains_connection(key)),
        );
    }

    /// Counts of pending edits
    pub fn changes_summary(&self) -> ChangesSummary {
        let mut summary = ChangesSummary::default();
        for change in &self.change_log {
            match change.change_type {
                ChangeType::AddNode | ChangeType::AddConnection => summary.added += 1,
                ChangeType::RemoveNode | ChangeType::RemoveConnection => summary.removed += 1,
                ChangeType::UpdateParams => summary.modified += 1,
            }
        }
        summary
    }
}
