//! Node kind catalog
//!
//! Maps kind strings (e.g. "audio::mixer") to their pin declarations and
//! parameter schema. The checker, the validator and the commit planner all
//! read from it; nothing in the engine mutates it after construction.
//!
//! # Registration
//!
//! Kinds compiled into the binary register themselves at link time:
//!
//! ```ignore
//! fn gain() -> NodeDefinition { ... }
//! inventory::submit!(staging_engine::DescriptorFn(gain));
//!
//! let catalog = NodeCatalog::with_builtins();
//! ```
//!
//! Plugin kinds discovered at runtime are added with `register` or by
//! merging another catalog.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::params::ParamSchema;
use crate::pins::{InputPin, OutputPin};

/// Fixed fan-in aggregation: the node must be created knowing its input count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanIn {
    /// Parameter that receives the number of connected inputs
    pub count_param: String,
}

/// Everything the engine knows about a node kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub kind: String,
    #[serde(default)]
    pub description: String,
    pub inputs: Vec<InputPin>,
    pub outputs: Vec<OutputPin>,
    #[serde(default)]
    pub param_schema: ParamSchema,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Data flows both ways; exempt from import cycle checks
    #[serde(default)]
    pub bidirectional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_in: Option<FanIn>,
}

impl NodeDefinition {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            description: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            param_schema: ParamSchema::default(),
            categories: Vec::new(),
            bidirectional: false,
            fan_in: None,
        }
    }

    /// Input declaration a connection to `pin_name` lands on
    pub fn input(&self, pin_name: &str) -> Option<&InputPin> {
        self.inputs
            .iter()
            .find(|p| p.name == pin_name)
            .or_else(|| self.inputs.iter().find(|p| p.matches(pin_name)))
    }

    pub fn output(&self, pin_name: &str) -> Option<&OutputPin> {
        self.outputs.iter().find(|p| p.name == pin_name)
    }

    /// The input a passthrough output mirrors: the sole input, or the one named "in"
    pub fn primary_input(&self) -> Option<&InputPin> {
        match self.inputs.as_slice() {
            [only] => Some(only),
            pins => pins.iter().find(|p| p.name == crate::constants::pins::IN),
        }
    }
}

/// Link-time registration of a built-in node kind
///
/// ```ignore
/// inventory::submit!(staging_engine::DescriptorFn(my_kind));
/// ```
pub struct DescriptorFn(pub fn() -> NodeDefinition);

inventory::collect!(DescriptorFn);

/// Catalog of node kinds
#[derive(Debug, Clone, Default)]
pub struct NodeCatalog {
    definitions: HashMap<String, NodeDefinition>,
}

impl NodeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-filled with every kind submitted through `DescriptorFn`
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        for descriptor in inventory::iter::<DescriptorFn> {
            catalog.register(descriptor.0());
        }
        log::debug!("Node catalog loaded {} built-in kinds", catalog.len());
        catalog
    }

    /// Register a kind, replacing any previous definition with the same name
    pub fn register(&mut self, definition: NodeDefinition) {
        self.definitions.insert(definition.kind.clone(), definition);
    }

    /// Merge another catalog; its definitions win
    pub fn merge(&mut self, other: NodeCatalog) {
        self.definitions.extend(other.definitions);
    }

    pub fn get(&self, kind: &str) -> Option<&NodeDefinition> {
        self.definitions.get(kind)
    }

    pub fn has_kind(&self, kind: &str) -> bool {
        self.definitions.contains_key(kind)
    }

    /// Sorted kind names
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn definitions(&self) -> impl Iterator<Item = &NodeDefinition> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Default params for a new node of `kind` (empty object if unknown)
    pub fn default_params(&self, kind: &str) -> serde_json::Value {
        self.get(kind)
            .map(|d| d.param_schema.defaults())
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()))
    }
}
