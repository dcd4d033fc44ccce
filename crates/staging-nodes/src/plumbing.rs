//! Plumbing nodes (`core::*` kinds)
//!
//! Type-agnostic plumbing: file I/O, pacing, passthrough and sinks.

use staging_engine::constants::pins::{IN, OUT};
use staging_engine::{InputPin, NodeDefinition, OutputPin, PacketType, ParamField, ParamSchema};

const CATEGORY: &str = "core";

/// Forwards packets unchanged; its output takes the upstream type
pub struct PassthroughNode;

impl PassthroughNode {
    pub const KIND: &'static str = "core::passthrough";

    pub fn descriptor() -> NodeDefinition {
        let mut def = NodeDefinition::new(Self::KIND);
        def.description = "Forwards every packet unchanged".to_string();
        def.inputs = vec![InputPin::one(IN, vec![PacketType::Any])];
        def.outputs = vec![OutputPin::broadcast(OUT, PacketType::Passthrough)];
        def.categories = vec![CATEGORY.to_string()];
        def
    }
}

inventory::submit!(staging_engine::DescriptorFn(PassthroughNode::descriptor));

/// Releases packets at real-time speed (or a multiple of it)
pub struct PacerNode;

impl PacerNode {
    pub const KIND: &'static str = "core::pacer";
    pub const PARAM_SPEED: &'static str = "speed";

    pub fn descriptor() -> NodeDefinition {
        let mut def = NodeDefinition::new(Self::KIND);
        def.description = "Paces packets to their timestamps".to_string();
        def.inputs = vec![InputPin::one(IN, vec![PacketType::Any])];
        def.outputs = vec![OutputPin::broadcast(OUT, PacketType::Passthrough)];
        def.param_schema = ParamSchema::new().field(
            Self::PARAM_SPEED,
            ParamField::number(1.0, 0.1, 10.0)
                .tunable()
                .described("Playback speed multiplier"),
        );
        def.categories = vec![CATEGORY.to_string(), "timing".to_string()];
        def
    }
}

inventory::submit!(staging_engine::DescriptorFn(PacerNode::descriptor));

/// Reads a file in fixed-size chunks
pub struct FileReaderNode;

impl FileReaderNode {
    pub const KIND: &'static str = "core::file_reader";
    pub const PARAM_PATH: &'static str = "path";
    pub const PARAM_CHUNK_SIZE: &'static str = "chunk_size";

    pub fn descriptor() -> NodeDefinition {
        let mut def = NodeDefinition::new(Self::KIND);
        def.description = "Reads a file and emits its bytes".to_string();
        def.outputs = vec![OutputPin::broadcast(OUT, PacketType::Binary)];
        def.param_schema = ParamSchema::new()
            .field(
                Self::PARAM_PATH,
                ParamField::string(None).described("File to read"),
            )
            .field(
                Self::PARAM_CHUNK_SIZE,
                ParamField::integer(8192).bounded(1.0, 1_048_576.0),
            );
        def.categories = vec![CATEGORY.to_string(), "io".to_string()];
        def
    }
}

inventory::submit!(staging_engine::DescriptorFn(FileReaderNode::descriptor));

pub struct FileWriterNode;

impl FileWriterNode {
    pub const KIND: &'static str = "core::file_writer";
    pub const PARAM_PATH: &'static str = "path";

    pub fn descriptor() -> NodeDefinition {
        let mut def = NodeDefinition::new(Self::KIND);
        def.description = "Writes incoming bytes to a file".to_string();
        def.inputs = vec![InputPin::one(IN, vec![PacketType::Binary])];
        def.param_schema =
            ParamSchema::new().field(Self::PARAM_PATH, ParamField::string(None));
        def.categories = vec![CATEGORY.to_string(), "io".to_string()];
        def
    }
}

inventory::submit!(staging_engine::DescriptorFn(FileWriterNode::descriptor));

/// Drops everything it receives
pub struct SinkNode;

impl SinkNode {
    pub const KIND: &'static str = "core::sink";

    pub fn descriptor() -> NodeDefinition {
        let mut def = NodeDefinition::new(Self::KIND);
        def.description = "Discards every packet".to_string();
        def.inputs = vec![InputPin::one(IN, vec![PacketType::Any])];
        def.categories = vec![CATEGORY.to_string()];
        def
    }
}

inventory::submit!(staging_engine::DescriptorFn(SinkNode::descriptor));
