//! Fluent builder for pipelines
//!
//! Provides a fluent API for constructing pipelines programmatically.

use crate::state::NodeState;
use crate::types::{Connection, ConnectionMode, Node, Pipeline};

/// Fluent builder for constructing pipelines
///
/// # Example
///
/// ```ignore
/// let pipeline = PipelineBuilder::new("voice-chat")
///     .add_node("mic", "core::file_reader")
///     .with_params(serde_json::json!({"path": "mic.ogg"}))
///     .add_node("gain", "audio::gain")
///     .connect("mic", "out", "gain", "in")
///     .build();
/// ```
pub struct PipelineBuilder {
    pipeline: Pipeline,
    last_node: Option<String>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            pipeline: Pipeline {
                name: Some(name.into()),
                ..Pipeline::default()
            },
            last_node: None,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.pipeline.description = Some(description.into());
        self
    }

    /// Add a node with empty params
    pub fn add_node(mut self, id: impl Into<String>, kind: impl Into<String>) -> Self {
        let id = id.into();
        self.pipeline.nodes.insert(id.clone(), Node::new(kind));
        self.last_node = Some(id);
        self
    }

    /// Set params on the most recently added node
    ///
    /// Must be called immediately after `add_node`.
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        if let Some(node) = self
            .last_node
            .as_ref()
            .and_then(|id| self.pipeline.nodes.get_mut(id))
        {
            node.params = params;
        }
        self
    }

    /// Set the lifecycle state of the most recently added node
    pub fn with_state(mut self, state: NodeState) -> Self {
        if let Some(node) = self
            .last_node
            .as_ref()
            .and_then(|id| self.pipeline.nodes.get_mut(id))
        {
            node.state = state;
        }
        self
    }

    /// Connect two pins with the default mode
    pub fn connect(
        self,
        from_node: impl Into<String>,
        from_pin: impl Into<String>,
        to_node: impl Into<String>,
        to_pin: impl Into<String>,
    ) -> Self {
        self.connect_with_mode(from_node, from_pin, to_node, to_pin, ConnectionMode::default())
    }

    pub fn connect_with_mode(
        mut self,
        from_node: impl Into<String>,
        from_pin: impl Into<String>,
        to_node: impl Into<String>,
        to_pin: impl Into<String>,
        mode: ConnectionMode,
    ) -> Self {
        self.pipeline
            .connections
            .push(Connection::new(from_node, from_pin, to_node, to_pin).with_mode(mode));
        self
    }

    /// Build the pipeline without validation
    pub fn build(self) -> Pipeline {
        self.pipeline
    }
}
