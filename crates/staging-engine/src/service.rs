//! Staging service
//!
//! Ties the overlay registry to the live runtime. The registry sits behind a
//! synchronous lock that is never held across an `.await`; commits and
//! tunes talk to the runtime with the lock released. A background task
//! applies coalesced param writes once their quiet period has passed.
//!
//! Commit sequence:
//! 1. apply the target's pending param writes and capture the overlay epoch
//! 2. validate the draft; blocking errors stop here
//! 3. plan against a fresh live snapshot; an empty plan sends nothing
//! 4. submit the batch as one unit
//! 5. on success drop the overlay, on failure leave it exactly as it was
//!
//! If the overlay was discarded while the batch was in flight, the result
//! is reported as `StagingError::Stale` and otherwise ignored.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::catalog::NodeCatalog;
use crate::commit::{self, BatchOperation};
use crate::config::StagingConfig;
use crate::error::{Result, StagingError};
use crate::events::{EditMode, EventSink, StagingEvent};
use crate::overlay::StagingOverlay;
use crate::packet::packet_type_registry;
use crate::runtime::RuntimeChannel;
use crate::session::{AppliedParams, StagingRegistry};
use crate::types::{Connection, NodeId, NodePosition};
use crate::validation::{self, ValidationError};

/// Staging front door for one runtime
///
/// Must be created inside a tokio runtime; the coalescing task is spawned
/// on construction and stops when the service is dropped.
pub struct StagingService {
    registry: Arc<Mutex<StagingRegistry>>,
    catalog: Arc<NodeCatalog>,
    runtime: Arc<dyn RuntimeChannel>,
    events: Arc<dyn EventSink>,
    wake: mpsc::UnboundedSender<()>,
    driver: JoinHandle<()>,
}

impl StagingService {
    pub fn new(
        catalog: Arc<NodeCatalog>,
        config: StagingConfig,
        runtime: Arc<dyn RuntimeChannel>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let registry = Arc::new(Mutex::new(StagingRegistry::new(Arc::clone(&catalog), config)));
        let (wake, wake_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive_coalescer(
            Arc::clone(&registry),
            Arc::clone(&events),
            wake_rx,
        ));

        Self {
            registry,
            catalog,
            runtime,
            events,
            wake,
            driver,
        }
    }

    fn emit(&self, event: StagingEvent) {
        emit(self.events.as_ref(), event);
    }

    /// Direct access to the registry under its lock
    pub fn with_registry<R>(&self, f: impl FnOnce(&mut StagingRegistry) -> R) -> R {
        f(&mut *self.registry.lock())
    }

    pub fn mode(&self, target: &str) -> EditMode {
        self.registry.lock().mode(target)
    }

    /// Copy of the target's overlay
    pub fn overlay(&self, target: &str) -> Option<StagingOverlay> {
        self.registry.lock().overlay(target).cloned()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Enter staging on the runtime's current pipeline
    pub async fn enter(&self, target: &str) -> Result<()> {
        let live = self.runtime.snapshot(target).await?;
        self.registry.lock().enter(target, live)?;
        self.emit(StagingEvent::mode_changed(target, EditMode::Staging));
        Ok(())
    }

    /// Leave staging, keeping cached editor data
    pub fn exit(&self, target: &str) -> bool {
        let existed = self.registry.lock().exit(target);
        if existed {
            self.emit(StagingEvent::mode_changed(target, EditMode::Monitor));
        }
        existed
    }

    /// Throw away the overlay and its cached editor data
    pub fn discard(&self, target: &str) -> Result<bool> {
        let existed = self.registry.lock().discard(target)?;
        if existed {
            self.emit(StagingEvent::mode_changed(target, EditMode::Monitor));
        }
        Ok(existed)
    }

    // =========================================================================
    // Edits
    // =========================================================================

    fn edited<F>(&self, target: &str, edit: F) -> Result<Option<u64>>
    where
        F: FnOnce(&mut StagingRegistry) -> Result<Option<&StagingOverlay>>,
    {
        let version = {
            let mut registry = self.registry.lock();
            edit(&mut *registry)?.map(StagingOverlay::version)
        };
        if let Some(version) = version {
            self.emit(StagingEvent::overlay_changed(target, version));
        }
        Ok(version)
    }

    /// Returns the new overlay version, or `None` if the target is not staging
    pub fn add_node(
        &self,
        target: &str,
        node_id: &str,
        kind: &str,
        params: Option<serde_json::Value>,
    ) -> Result<Option<u64>> {
        self.edited(target, |r| r.add_node(target, node_id, kind, params))
    }

    pub fn remove_node(&self, target: &str, node_id: &str) -> Result<Option<u64>> {
        self.edited(target, |r| r.remove_node(target, node_id))
    }

    pub fn connect(&self, target: &str, candidate: Connection) -> Result<Option<u64>> {
        self.edited(target, |r| r.connect(target, candidate))
    }

    pub fn disconnect(&self, target: &str, key: &str) -> Result<Option<u64>> {
        self.edited(target, |r| r.disconnect(target, key))
    }

    pub fn import_yaml(&self, target: &str, text: &str) -> Result<Option<u64>> {
        self.edited(target, |r| r.import_yaml(target, text))
    }

    pub fn export_yaml(&self, target: &str) -> Result<Option<String>> {
        self.registry.lock().export_yaml(target)
    }

    pub fn undo(&self, target: &str) -> Result<Option<u64>> {
        self.edited(target, |r| r.undo(target))
    }

    pub fn redo(&self, target: &str) -> Result<Option<u64>> {
        self.edited(target, |r| r.redo(target))
    }

    pub fn set_position(&self, target: &str, node_id: &str, position: NodePosition) -> bool {
        self.registry.lock().set_position(target, node_id, position)
    }

    pub fn auto_layout(&self, target: &str, measured: &HashMap<NodeId, (f64, f64)>) -> bool {
        self.registry.lock().auto_layout(target, measured)
    }

    /// Queue a partial params edit; applied after the quiet period
    ///
    /// Returns whether the target is staging.
    pub fn update_params(&self, target: &str, node_id: &str, partial: serde_json::Value) -> Result<bool> {
        let deadline = self
            .registry
            .lock()
            .update_params(target, node_id, partial, Instant::now())?;
        if deadline.is_some() && self.wake.send(()).is_err() {
            log::warn!("[{}] coalescing task is gone; params stay pending", target);
        }
        Ok(deadline.is_some())
    }

    // =========================================================================
    // Runtime-facing operations
    // =========================================================================

    /// Submit the target's staged changes to the runtime
    ///
    /// Pending param writes are applied to the draft first. They stay
    /// applied, with their undo step, when validation blocks the commit or
    /// the runtime refuses it.
    ///
    /// Returns the operations sent; empty when there was nothing to send.
    pub async fn commit(&self, target: &str) -> Result<Vec<BatchOperation>> {
        let (epoch, staged, flushed) = {
            let mut registry = self.registry.lock();
            let flushed = registry.flush_target(target);
            let overlay = registry
                .overlay(target)
                .ok_or_else(|| StagingError::NotStaging(target.to_string()))?;
            (overlay.epoch(), Arc::clone(overlay.staged()), flushed)
        };
        announce_params(self.events.as_ref(), flushed);

        let blocking: Vec<ValidationError> =
            validation::validate_pipeline(&staged, &self.catalog, packet_type_registry())
                .into_iter()
                .filter(ValidationError::is_blocking)
                .collect();
        if !blocking.is_empty() {
            log::info!("[{}] commit blocked by {} validation error(s)", target, blocking.len());
            self.emit(StagingEvent::CommitFailed {
                target: target.to_string(),
                errors: blocking.iter().map(ToString::to_string).collect(),
            });
            return Err(StagingError::ValidationFailed(blocking));
        }

        let live = self.runtime.snapshot(target).await?;
        let operations = commit::plan(&staged, &live, &self.catalog);
        if operations.is_empty() {
            log::info!("[{}] nothing to commit", target);
            self.finish_commit(target, epoch, 0)?;
            return Ok(operations);
        }

        log::info!("[{}] committing {} operation(s)", target, operations.len());
        let result = self.runtime.batch_apply(target, operations.clone()).await;

        let still_current = self
            .registry
            .lock()
            .overlay(target)
            .is_some_and(|o| o.epoch() == epoch);
        if !still_current {
            log::warn!("[{}] ignoring commit result for a discarded overlay", target);
            return Err(StagingError::Stale(target.to_string()));
        }

        match result {
            Ok(batch) if batch.success => {
                self.finish_commit(target, epoch, operations.len())?;
                Ok(operations)
            }
            Ok(batch) => {
                let errors = if batch.errors.is_empty() {
                    vec!["batch rejected by runtime".to_string()]
                } else {
                    batch.errors
                };
                self.emit(StagingEvent::CommitFailed {
                    target: target.to_string(),
                    errors: errors.clone(),
                });
                Err(StagingError::CommitRejected(errors))
            }
            Err(e) => {
                self.emit(StagingEvent::CommitFailed {
                    target: target.to_string(),
                    errors: vec![e.to_string()],
                });
                Err(e)
            }
        }
    }

    fn finish_commit(&self, target: &str, epoch: Uuid, operations: usize) -> Result<()> {
        if let Err(e) = self.registry.lock().finish_commit(target, epoch) {
            log::warn!("[{}] commit finished after the overlay changed: {}", target, e);
            return Err(e);
        }
        log::info!("[{}] commit applied ({} operation(s))", target, operations);
        self.emit(StagingEvent::CommitSucceeded {
            target: target.to_string(),
            operations,
        });
        self.emit(StagingEvent::mode_changed(target, EditMode::Monitor));
        Ok(())
    }

    /// Change one param of a running node right away
    ///
    /// Only for targets in monitor mode. The value is checked against the
    /// kind's schema before anything is sent.
    pub async fn tune(
        &self,
        target: &str,
        node_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        if self.mode(target) == EditMode::Staging {
            return Err(StagingError::AlreadyStaging(target.to_string()));
        }

        let live = self.runtime.snapshot(target).await?;
        let node = live
            .node(node_id)
            .ok_or_else(|| StagingError::UnknownNode(node_id.to_string()))?;
        let definition = self
            .catalog
            .get(&node.kind)
            .ok_or_else(|| StagingError::UnknownKind {
                node_id: node_id.to_string(),
                kind: node.kind.clone(),
            })?;
        definition
            .param_schema
            .validate_tune(key, &value)
            .map_err(|message| StagingError::InvalidTune {
                node_id: node_id.to_string(),
                key: key.to_string(),
                message,
            })?;

        log::debug!("[{}] tuning {}.{} = {}", target, node_id, key, value);
        self.runtime.tune(target, node_id, key, value).await
    }
}

impl Drop for StagingService {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

fn emit(events: &dyn EventSink, event: StagingEvent) {
    if let Err(e) = events.send(event) {
        log::warn!("Failed to send staging event: {}", e);
    }
}

fn announce_params(events: &dyn EventSink, applied: Vec<AppliedParams>) {
    for write in applied {
        let version = write.version;
        let target = write.target.clone();
        emit(
            events,
            StagingEvent::ParamsCoalesced {
                target: write.target,
                node_id: write.node_id,
                params: write.params,
            },
        );
        emit(events, StagingEvent::overlay_changed(&target, version));
    }
}

/// Sleep until the next param deadline, apply what is due, repeat
///
/// Any message on `wake` means the deadlines may have moved. Ends when the
/// sending side is dropped.
async fn drive_coalescer(
    registry: Arc<Mutex<StagingRegistry>>,
    events: Arc<dyn EventSink>,
    mut wake: mpsc::UnboundedReceiver<()>,
) {
    loop {
        let next = registry.lock().next_deadline();
        match next {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    message = wake.recv() => {
                        if message.is_none() {
                            break;
                        }
                        continue;
                    }
                }
            }
            None => {
                if wake.recv().await.is_none() {
                    break;
                }
                continue;
            }
        }

        let applied = registry.lock().flush_due(Instant::now());
        announce_params(events.as_ref(), applied);
    }
    log::debug!("Param coalescing task stopped");
}
