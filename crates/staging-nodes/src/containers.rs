//! Container nodes
//!
//! Ogg framing for Opus streams.

use staging_engine::constants::pins::{IN, OUT};
use staging_engine::{InputPin, NodeDefinition, OutputPin, PacketType, ParamField, ParamSchema};

const CATEGORY: &str = "containers";

/// Wraps Opus packets in Ogg pages
pub struct OggMuxerNode;

impl OggMuxerNode {
    pub const KIND: &'static str = "containers::ogg::muxer";
    pub const PARAM_STREAM_SERIAL: &'static str = "stream_serial";

    pub fn descriptor() -> NodeDefinition {
        let mut def = NodeDefinition::new(Self::KIND);
        def.description = "Muxes Opus packets into an Ogg stream".to_string();
        def.inputs = vec![InputPin::one(IN, vec![PacketType::OpusAudio])];
        def.outputs = vec![OutputPin::broadcast(OUT, PacketType::Binary)];
        def.param_schema = ParamSchema::new().field(
            Self::PARAM_STREAM_SERIAL,
            ParamField::integer(0).bounded(0.0, f64::from(u32::MAX)),
        );
        def.categories = vec![CATEGORY.to_string(), "ogg".to_string()];
        def
    }
}

inventory::submit!(staging_engine::DescriptorFn(OggMuxerNode::descriptor));

pub struct OggDemuxerNode;

impl OggDemuxerNode {
    pub const KIND: &'static str = "containers::ogg::demuxer";

    pub fn descriptor() -> NodeDefinition {
        let mut def = NodeDefinition::new(Self::KIND);
        def.description = "Extracts Opus packets from an Ogg stream".to_string();
        def.inputs = vec![InputPin::one(IN, vec![PacketType::Binary])];
        def.outputs = vec![OutputPin::broadcast(OUT, PacketType::OpusAudio)];
        def.categories = vec![CATEGORY.to_string(), "ogg".to_string()];
        def
    }
}

inventory::submit!(staging_engine::DescriptorFn(OggDemuxerNode::descriptor));
