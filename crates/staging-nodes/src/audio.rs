//! Audio nodes
//!
//! Raw f32 processing (gain, mixing, resampling) and the Opus codec pair.

use staging_engine::constants::{defaults::FAN_IN_PARAM, pins::{IN, OUT}};
use staging_engine::{
    AudioFormat, FanIn, InputPin, NodeDefinition, OutputPin, PacketType, ParamField, ParamSchema,
    SampleFormat,
};

const CATEGORY: &str = "audio";

/// Opus always decodes at 48 kHz
pub const OPUS_SAMPLE_RATE: u32 = 48_000;

fn raw_f32() -> PacketType {
    PacketType::raw_audio_any(SampleFormat::F32)
}

/// Multiplies every sample by a linear factor
///
/// `gain` can be tuned on a running node.
pub struct GainNode;

impl GainNode {
    pub const KIND: &'static str = "audio::gain";
    pub const PARAM_GAIN: &'static str = "gain";

    pub fn descriptor() -> NodeDefinition {
        let mut def = NodeDefinition::new(Self::KIND);
        def.description = "Applies linear gain to raw audio".to_string();
        def.inputs = vec![InputPin::one(IN, vec![raw_f32()])];
        def.outputs = vec![OutputPin::broadcast(OUT, raw_f32())];
        def.param_schema = ParamSchema::new().field(
            Self::PARAM_GAIN,
            ParamField::number(1.0, 0.0, 4.0)
                .tunable()
                .described("Linear gain factor"),
        );
        def.categories = vec![CATEGORY.to_string(), "filters".to_string()];
        def
    }
}

inventory::submit!(staging_engine::DescriptorFn(GainNode::descriptor));

/// Sums any number of raw audio inputs
///
/// The runtime allocates one buffer per input when the node is created, so
/// the input count is a fan-in param filled in at commit time.
pub struct MixerNode;

impl MixerNode {
    pub const KIND: &'static str = "audio::mixer";
    pub const PARAM_SYNC_TIMEOUT_MS: &'static str = "sync_timeout_ms";

    pub fn descriptor() -> NodeDefinition {
        let mut def = NodeDefinition::new(Self::KIND);
        def.description = "Mixes several raw audio streams into one".to_string();
        def.inputs = vec![InputPin::dynamic(IN, IN, vec![raw_f32()])];
        def.outputs = vec![OutputPin::broadcast(OUT, raw_f32())];
        def.param_schema = ParamSchema::new()
            .field(
                FAN_IN_PARAM,
                ParamField::integer(0)
                    .bounded(0.0, 64.0)
                    .described("Number of connected inputs"),
            )
            .field(
                Self::PARAM_SYNC_TIMEOUT_MS,
                ParamField::integer(100).bounded(0.0, 10_000.0),
            );
        def.categories = vec![CATEGORY.to_string(), "mixing".to_string()];
        def.fan_in = Some(FanIn {
            count_param: FAN_IN_PARAM.to_string(),
        });
        def
    }
}

inventory::submit!(staging_engine::DescriptorFn(MixerNode::descriptor));

pub struct ResamplerNode;

impl ResamplerNode {
    pub const KIND: &'static str = "audio::resampler";
    pub const PARAM_TARGET_SAMPLE_RATE: &'static str = "target_sample_rate";

    pub fn descriptor() -> NodeDefinition {
        let mut def = NodeDefinition::new(Self::KIND);
        def.description = "Converts raw audio to another sample rate".to_string();
        def.inputs = vec![InputPin::one(IN, vec![raw_f32()])];
        def.outputs = vec![OutputPin::broadcast(OUT, raw_f32())];
        def.param_schema = ParamSchema::new().field(
            Self::PARAM_TARGET_SAMPLE_RATE,
            ParamField::integer(i64::from(OPUS_SAMPLE_RATE)).bounded(8_000.0, 192_000.0),
        );
        def.categories = vec![CATEGORY.to_string(), "filters".to_string()];
        def
    }
}

inventory::submit!(staging_engine::DescriptorFn(ResamplerNode::descriptor));

/// Encodes raw audio to Opus
pub struct OpusEncoderNode;

impl OpusEncoderNode {
    pub const KIND: &'static str = "audio::opus::encoder";
    pub const PARAM_BITRATE: &'static str = "bitrate";

    pub fn descriptor() -> NodeDefinition {
        let mut def = NodeDefinition::new(Self::KIND);
        def.description = "Encodes raw audio to Opus".to_string();
        def.inputs = vec![InputPin::one(IN, vec![raw_f32()])];
        def.outputs = vec![OutputPin::broadcast(OUT, PacketType::OpusAudio)];
        def.param_schema = ParamSchema::new().field(
            Self::PARAM_BITRATE,
            ParamField::integer(64_000)
                .bounded(6_000.0, 510_000.0)
                .described("Target bitrate in bits per second"),
        );
        def.categories = vec![CATEGORY.to_string(), "codecs".to_string()];
        def
    }
}

inventory::submit!(staging_engine::DescriptorFn(OpusEncoderNode::descriptor));

/// Decodes Opus to mono 48 kHz f32
pub struct OpusDecoderNode;

impl OpusDecoderNode {
    pub const KIND: &'static str = "audio::opus::decoder";

    pub fn descriptor() -> NodeDefinition {
        let mut def = NodeDefinition::new(Self::KIND);
        def.description = "Decodes Opus to raw audio".to_string();
        def.inputs = vec![InputPin::one(IN, vec![PacketType::OpusAudio])];
        def.outputs = vec![OutputPin::broadcast(
            OUT,
            PacketType::RawAudio(AudioFormat {
                sample_rate: OPUS_SAMPLE_RATE,
                channels: 1,
                sample_format: SampleFormat::F32,
            }),
        )];
        def.categories = vec![CATEGORY.to_string(), "codecs".to_string()];
        def
    }
}

inventory::submit!(staging_engine::DescriptorFn(OpusDecoderNode::descriptor));
