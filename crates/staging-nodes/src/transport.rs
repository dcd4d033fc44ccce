//! Transport nodes
//!
//! Network peers. A peer both publishes and subscribes, so its pins form a
//! loop with the rest of the graph by construction.

use staging_engine::constants::pins::{IN, OUT};
use staging_engine::{InputPin, NodeDefinition, OutputPin, PacketType, ParamField, ParamSchema};

/// Publishes its input to a MoQ relay and emits what it subscribes to
pub struct MoqPeerNode;

impl MoqPeerNode {
    pub const KIND: &'static str = "transport::moq::peer";
    pub const PARAM_URL: &'static str = "url";
    pub const PARAM_BROADCAST: &'static str = "broadcast";

    pub fn descriptor() -> NodeDefinition {
        let mut def = NodeDefinition::new(Self::KIND);
        def.description = "Bidirectional Opus peer over Media over QUIC".to_string();
        def.inputs = vec![InputPin::one(IN, vec![PacketType::OpusAudio])];
        def.outputs = vec![OutputPin::broadcast(OUT, PacketType::OpusAudio)];
        def.param_schema = ParamSchema::new()
            .field(
                Self::PARAM_URL,
                ParamField::string(None).described("Relay URL"),
            )
            .field(
                Self::PARAM_BROADCAST,
                ParamField::string(Some("input")).described("Broadcast name"),
            );
        def.categories = vec!["transport".to_string(), "moq".to_string()];
        def.bidirectional = true;
        def
    }
}

inventory::submit!(staging_engine::DescriptorFn(MoqPeerNode::descriptor));
