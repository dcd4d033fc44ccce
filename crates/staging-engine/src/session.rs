//! Registry of staging overlays, one per edit target
//!
//! A target without an overlay is in monitor mode. Every structural edit
//! runs on a copy of the overlay and replaces it only when the edit, the
//! undo snapshot and revalidation all succeed, so a failed edit leaves the
//! previous overlay intact.
//!
//! Param edits are coalesced per `(target, node_id)`: they accumulate in a
//! [`WriteCoalescer`] and reach the overlay only after the quiet period,
//! through [`StagingRegistry::flush_due`]. Each pending write remembers the
//! epoch of the overlay it was made against; if that overlay has been
//! discarded in the meantime the write is dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::time::Instant;
use uuid::Uuid;

use crate::catalog::NodeCatalog;
use crate::coalesce::WriteCoalescer;
use crate::compat::{CheckMode, ConnectionChecker};
use crate::config::StagingConfig;
use crate::declarative;
use crate::error::{Result, StagingError};
use crate::events::EditMode;
use crate::overlay::{ChangesSummary, StagingOverlay};
use crate::packet::{packet_type_registry, PacketTypeMeta};
use crate::params::merge_params;
use crate::persistence::{CachedStaging, StagingStore};
use crate::types::{Connection, NodeId, NodePosition, Pipeline};
use crate::undo::UndoStack;

type ParamsKey = (String, NodeId);

/// Partial params waiting out the quiet period, oldest first
#[derive(Debug, Clone)]
struct PendingParams {
    epoch: Uuid,
    partials: Vec<serde_json::Value>,
}

/// A coalesced write that reached an overlay
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedParams {
    pub target: String,
    pub node_id: NodeId,
    /// Full params of the node after the write
    pub params: serde_json::Value,
    pub version: u64,
}

struct Entry {
    overlay: StagingOverlay,
    history: UndoStack,
}

/// All overlays plus the pending param writes that feed them
pub struct StagingRegistry {
    catalog: Arc<NodeCatalog>,
    packet_types: &'static [PacketTypeMeta],
    config: StagingConfig,
    store: Option<StagingStore>,
    entries: HashMap<String, Entry>,
    params: WriteCoalescer<ParamsKey, PendingParams>,
}

impl StagingRegistry {
    pub fn new(catalog: Arc<NodeCatalog>, config: StagingConfig) -> Self {
        let store = config.persistence_dir.as_ref().map(StagingStore::new);
        Self {
            catalog,
            packet_types: packet_type_registry(),
            params: WriteCoalescer::new(config.coalesce_delay()),
            config,
            store,
            entries: HashMap::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<NodeCatalog> {
        &self.catalog
    }

    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    pub fn mode(&self, target: &str) -> EditMode {
        if self.entries.contains_key(target) {
            EditMode::Staging
        } else {
            EditMode::Monitor
        }
    }

    pub fn overlay(&self, target: &str) -> Option<&StagingOverlay> {
        self.entries.get(target).map(|e| &e.overlay)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start staging `target` on a snapshot of its live pipeline
    pub fn enter(&mut self, target: &str, live: Pipeline) -> Result<&StagingOverlay> {
        if self.entries.contains_key(target) {
            return Err(StagingError::AlreadyStaging(target.to_string()));
        }

        let mut overlay = StagingOverlay::enter(target, live);
        if let Some(store) = &self.store {
            if let Some(cached) = store.load(target)? {
                cached.restore_into(&mut overlay);
            }
        }
        overlay.revalidate(&self.catalog, self.packet_types);

        let mut history = UndoStack::new(self.config.undo_depth);
        history.push(&overlay)?;

        log::info!(
            "[{}] entered staging ({} nodes, {} connections)",
            target,
            overlay.original().nodes.len(),
            overlay.original().connections.len()
        );
        let entry = self
            .entries
            .entry(target.to_string())
            .or_insert(Entry { overlay, history });
        Ok(&entry.overlay)
    }

    /// Leave staging, keeping cached editor data for the next session
    ///
    /// Returns whether an overlay existed. Pending param writes for the
    /// target are dropped.
    pub fn exit(&mut self, target: &str) -> bool {
        let existed = self.entries.remove(target).is_some();
        let dropped = self.params.cancel_where(|(t, _)| t == target);
        if existed {
            log::info!("[{}] left staging ({} pending param writes dropped)", target, dropped);
        }
        existed
    }

    /// Throw the overlay away along with any cached editor data
    pub fn discard(&mut self, target: &str) -> Result<bool> {
        let existed = self.exit(target);
        if let Some(store) = &self.store {
            store.remove(target)?;
        }
        Ok(existed)
    }

    // =========================================================================
    // Structural edits
    // =========================================================================

    /// Run `edit` on a copy of the target's overlay and keep it on success
    ///
    /// `Ok(None)` when the target is not staging.
    fn edit<F>(&mut self, target: &str, edit: F) -> Result<Option<&StagingOverlay>>
    where
        F: FnOnce(&mut StagingOverlay, &NodeCatalog, &[PacketTypeMeta]) -> Result<()>,
    {
        let Some(entry) = self.entries.get_mut(target) else {
            log::debug!("[{}] edit ignored: not staging", target);
            return Ok(None);
        };

        let mut draft = entry.overlay.clone();
        edit(&mut draft, self.catalog.as_ref(), self.packet_types)?;
        draft.revalidate(&self.catalog, self.packet_types);
        entry.history.push(&draft)?;
        entry.overlay = draft;

        if let Some(store) = &self.store {
            if let Err(e) = store.save(target, &CachedStaging::from_overlay(&entry.overlay)) {
                log::warn!("[{}] failed to cache staging data: {}", target, e);
            }
        }
        Ok(Some(&entry.overlay))
    }

    /// Add a node of `kind`, starting from the kind's default params
    pub fn add_node(
        &mut self,
        target: &str,
        node_id: &str,
        kind: &str,
        params: Option<serde_json::Value>,
    ) -> Result<Option<&StagingOverlay>> {
        self.edit(target, |overlay, catalog, _| {
            if !catalog.has_kind(kind) {
                return Err(StagingError::UnknownKind {
                    node_id: node_id.to_string(),
                    kind: kind.to_string(),
                });
            }
            let defaults = catalog.default_params(kind);
            let params = match params {
                Some(explicit) => merge_params(&defaults, &explicit),
                None => defaults,
            };
            overlay.add_node(node_id, crate::types::Node::new(kind).with_params(params))
        })
    }

    pub fn remove_node(&mut self, target: &str, node_id: &str) -> Result<Option<&StagingOverlay>> {
        self.params.cancel(&(target.to_string(), node_id.to_string()));
        self.edit(target, |overlay, _, _| overlay.remove_node(node_id))
    }

    /// Check `candidate` and add it
    ///
    /// A dynamic template pin is replaced by its allocated concrete pin.
    pub fn connect(&mut self, target: &str, candidate: Connection) -> Result<Option<&StagingOverlay>> {
        self.edit(target, |overlay, catalog, packet_types| {
            let accepted = ConnectionChecker::new(catalog, packet_types)
                .with_mode(CheckMode::Draft)
                .reserve_keys(overlay.staged_connection_keys())
                .check(overlay.staged(), &candidate)?;
            overlay.add_connection(accepted)
        })
    }

    pub fn disconnect(&mut self, target: &str, key: &str) -> Result<Option<&StagingOverlay>> {
        self.edit(target, |overlay, _, _| overlay.remove_connection(key))
    }

    /// Replace the draft with a parsed YAML document
    ///
    /// A parse error leaves the overlay untouched.
    pub fn import_yaml(&mut self, target: &str, text: &str) -> Result<Option<&StagingOverlay>> {
        let parsed = declarative::parse_yaml(text, Some(self.catalog.as_ref()))?;
        self.params.cancel_where(|(t, _)| t == target);
        self.edit(target, |overlay, _, _| overlay.replace_staged(parsed))
    }

    /// YAML form of the draft
    pub fn export_yaml(&self, target: &str) -> Result<Option<String>> {
        self.overlay(target)
            .map(|o| declarative::export_yaml(o.staged()))
            .transpose()
    }

    // =========================================================================
    // Editor data
    // =========================================================================

    /// Move a node on the canvas; does not bump the version
    pub fn set_position(&mut self, target: &str, node_id: &str, position: NodePosition) -> bool {
        let Some(entry) = self.entries.get_mut(target) else {
            return false;
        };
        entry.overlay.set_position(node_id, position);
        self.persist(target);
        true
    }

    /// Lay the draft out again, using measured sizes where known
    pub fn auto_layout(&mut self, target: &str, measured: &HashMap<NodeId, (f64, f64)>) -> bool {
        let Some(entry) = self.entries.get_mut(target) else {
            return false;
        };
        entry.overlay.auto_layout(measured, &self.config.layout);
        self.persist(target);
        true
    }

    fn persist(&self, target: &str) {
        let (Some(store), Some(overlay)) = (&self.store, self.overlay(target)) else {
            return;
        };
        if let Err(e) = store.save(target, &CachedStaging::from_overlay(overlay)) {
            log::warn!("[{}] failed to cache staging data: {}", target, e);
        }
    }

    pub fn changes_summary(&self, target: &str) -> Option<ChangesSummary> {
        self.overlay(target).map(StagingOverlay::changes_summary)
    }

    // =========================================================================
    // Undo / redo
    // =========================================================================

    pub fn undo(&mut self, target: &str) -> Result<Option<&StagingOverlay>> {
        self.step_history(target, true)
    }

    pub fn redo(&mut self, target: &str) -> Result<Option<&StagingOverlay>> {
        self.step_history(target, false)
    }

    fn step_history(&mut self, target: &str, back: bool) -> Result<Option<&StagingOverlay>> {
        let Some(entry) = self.entries.get_mut(target) else {
            return Ok(None);
        };
        let restored = if back {
            entry.history.undo()
        } else {
            entry.history.redo()
        };

        if let Some(restored) = restored {
            entry.overlay = restored?;
            log::debug!(
                "[{}] {} to version {}",
                target,
                if back { "undid" } else { "redid" },
                entry.overlay.version()
            );
            self.params.cancel_where(|(t, _)| t == target);
            self.persist(target);
        }
        Ok(self.overlay(target))
    }

    // =========================================================================
    // Coalesced param writes
    // =========================================================================

    /// Queue a partial params update
    ///
    /// Returns when the accumulated value will be applied, or `None` if the
    /// target is not staging. The overlay is not touched until
    /// [`flush_due`](Self::flush_due) runs past that deadline.
    pub fn update_params(
        &mut self,
        target: &str,
        node_id: &str,
        partial: serde_json::Value,
        now: Instant,
    ) -> Result<Option<Instant>> {
        let Some(overlay) = self.overlay(target) else {
            return Ok(None);
        };
        if !overlay.staged().contains_node(node_id) {
            return Err(StagingError::UnknownNode(node_id.to_string()));
        }

        let pending = PendingParams {
            epoch: overlay.epoch(),
            partials: vec![partial],
        };
        let deadline = self.params.push(
            (target.to_string(), node_id.to_string()),
            pending,
            now,
            |mut previous, next| {
                if previous.epoch == next.epoch {
                    previous.partials.extend(next.partials);
                    previous
                } else {
                    next
                }
            },
        );
        Ok(Some(deadline))
    }

    /// Earliest pending param deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.params.next_deadline()
    }

    /// Whether a param write for the node is waiting
    pub fn has_pending_params(&self, target: &str, node_id: &str) -> bool {
        self.params
            .pending(&(target.to_string(), node_id.to_string()))
            .is_some()
    }

    /// Apply every param write whose quiet period has passed
    pub fn flush_due(&mut self, now: Instant) -> Vec<AppliedParams> {
        let due = self.params.drain_due(now);
        self.apply_pending(due)
    }

    /// Apply the target's pending param writes immediately
    pub fn flush_target(&mut self, target: &str) -> Vec<AppliedParams> {
        let keys: Vec<ParamsKey> = match self.entries.get(target) {
            Some(entry) => entry
                .overlay
                .staged()
                .nodes
                .keys()
                .map(|id| (target.to_string(), id.clone()))
                .collect(),
            None => Vec::new(),
        };

        let due: Vec<(ParamsKey, PendingParams)> = keys
            .into_iter()
            .filter_map(|key| self.params.cancel(&key).map(|p| (key, p)))
            .collect();
        self.apply_pending(due)
    }

    fn apply_pending(&mut self, due: Vec<(ParamsKey, PendingParams)>) -> Vec<AppliedParams> {
        let mut applied = Vec::new();
        let mut touched = HashSet::new();

        for ((target, node_id), pending) in due {
            let Some(entry) = self.entries.get_mut(&target) else {
                log::warn!("[{}] dropping param write for '{}': not staging", target, node_id);
                continue;
            };
            if entry.overlay.epoch() != pending.epoch {
                log::warn!("[{}] dropping param write for '{}': overlay was replaced", target, node_id);
                continue;
            }
            let Some(current) = entry.overlay.staged().node(&node_id).map(|n| n.params.clone()) else {
                log::debug!("[{}] dropping param write for removed node '{}'", target, node_id);
                continue;
            };

            let params = pending
                .partials
                .iter()
                .fold(current, |params, partial| merge_params(&params, partial));
            if let Err(e) = entry.overlay.apply_params(&node_id, params.clone()) {
                log::warn!("[{}] failed to apply params for '{}': {}", target, node_id, e);
                continue;
            }
            log::debug!("[{}] applied coalesced params for '{}'", target, node_id);
            applied.push(AppliedParams {
                target: target.clone(),
                node_id,
                params,
                version: entry.overlay.version(),
            });
            touched.insert(target);
        }

        for target in touched {
            if let Some(entry) = self.entries.get_mut(&target) {
                entry.overlay.revalidate(&self.catalog, self.packet_types);
                if let Err(e) = entry.history.push(&entry.overlay) {
                    log::warn!("[{}] failed to record undo snapshot: {}", target, e);
                }
            }
        }
        applied
    }

    /// Drop the overlay after the runtime accepted its commit
    ///
    /// Only the overlay with `epoch` is removed; a newer overlay for the
    /// same target is left alone and `Stale` is returned.
    pub(crate) fn finish_commit(&mut self, target: &str, epoch: Uuid) -> Result<()> {
        match self.entries.get(target) {
            Some(entry) if entry.overlay.epoch() == epoch => {
                self.discard(target)?;
                Ok(())
            }
            _ => Err(StagingError::Stale(target.to_string())),
        }
    }
}
