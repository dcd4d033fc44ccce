//! Staging Engine - Safe editing of live dataflow pipelines
//!
//! This crate lets an operator edit a running, typed pipeline without
//! touching the live graph until an explicit, atomic commit, while a
//! separate mirror keeps per-node health up to date. It supports:
//!
//! - Copy-on-write staging overlays with a self-cancelling change log
//! - Pin type and cardinality checks, including passthrough resolution
//! - Topological ordering, auto-layout and YAML import/export
//! - Minimal commit batches with fan-in input counts injected up front
//! - Coalesced param edits and compressed snapshot-based undo/redo
//! - A runtime state mirror that maps slow inputs back to their sources
//!
//! # Architecture
//!
//! - `StagingOverlay`: one editable draft and its net change log
//! - `StagingRegistry`: overlays keyed by target, plus pending param writes
//! - `StagingService`: registry + `RuntimeChannel` + coalescing task
//! - `RuntimeStateMirror` / `MirrorHandle`: live state, fed by runtime events
//! - `NodeCatalog`: node kinds, collected at link time via `inventory`
//!
//! # Example
//!
//! ```ignore
//! use staging_engine::{MemoryRuntime, NodeCatalog, StagingConfig, StagingService, NullEventSink};
//!
//! let service = StagingService::new(
//!     Arc::new(NodeCatalog::with_builtins()),
//!     StagingConfig::default(),
//!     Arc::new(runtime),
//!     Arc::new(NullEventSink),
//! );
//! service.enter("session-1").await?;
//! service.add_node("session-1", "gain", "audio::gain", None)?;
//! service.commit("session-1").await?;
//! ```

pub mod builder;
pub mod catalog;
pub mod coalesce;
pub mod commit;
pub mod compat;
pub mod config;
pub mod constants;
pub mod declarative;
pub mod error;
pub mod events;
pub mod mirror;
pub mod overlay;
pub mod packet;
pub mod params;
pub mod persistence;
pub mod pins;
pub mod runtime;
pub mod service;
pub mod session;
pub mod state;
pub mod topology;
pub mod types;
pub mod undo;
pub mod validation;

// Re-export key types
pub use builder::PipelineBuilder;
pub use catalog::{DescriptorFn, FanIn, NodeCatalog, NodeDefinition};
pub use coalesce::WriteCoalescer;
pub use commit::{plan, BatchOperation, BatchResult};
pub use compat::{CheckMode, ConnectionChecker, ConnectionRejection, TypeResolver};
pub use config::{LayoutConfig, StagingConfig};
pub use declarative::{export_yaml, parse_yaml};
pub use error::{Result, StagingError};
pub use events::{EditMode, EventSink, NullEventSink, StagingEvent, VecEventSink};
pub use mirror::{MirrorHandle, MirrorUpdate, RuntimeEvent, RuntimeStateMirror};
pub use overlay::{ChangeType, ChangesSummary, StagedChange, StagingOverlay};
pub use packet::{can_connect, packet_type_registry, AudioFormat, PacketType, SampleFormat};
pub use params::{merge_params, params_equal, ParamField, ParamSchema, ParamType};
pub use persistence::{CachedStaging, StagingStore};
pub use pins::{InputPin, OutputPin, PinCardinality};
pub use runtime::{MemoryRuntime, RuntimeChannel};
pub use service::StagingService;
pub use session::StagingRegistry;
pub use state::{NodeState, StopReason};
pub use types::{Connection, ConnectionMode, Node, NodeId, NodePosition, Pipeline};
pub use undo::UndoStack;
pub use validation::{validate_pipeline, Severity, ValidationError};

// Re-export inventory so node crates can submit descriptors
pub use inventory;
