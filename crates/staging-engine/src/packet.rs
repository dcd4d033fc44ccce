//! Packet types and the compatibility rules between them
//!
//! Every pin declares the packet type it produces (outputs) or the list of
//! packet types it accepts (inputs). Whether an output may feed an input is
//! decided by a small, data-driven registry: each type id carries a
//! compatibility strategy, so parameterized kinds like raw audio can match
//! field-by-field with wildcards.

use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Sample encoding of raw audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    F32,
    S16Le,
}

/// Format descriptor carried by `PacketType::RawAudio`
///
/// `0` for `sample_rate` or `channels` means "any".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

/// The type of data flowing through a pin
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketType {
    /// Uncompressed audio in a specific (possibly wildcarded) format
    RawAudio(AudioFormat),
    /// Compressed Opus audio
    OpusAudio,
    /// Plain text
    Text,
    /// Structured transcription data
    Transcription,
    /// Namespaced, versioned plugin type
    Custom { type_id: String },
    /// Opaque bytes
    Binary,
    /// Matches everything
    Any,
    /// Same type as this node's resolved upstream input
    Passthrough,
}

impl PacketType {
    /// Wildcard raw audio in the given sample format
    pub fn raw_audio_any(sample_format: SampleFormat) -> Self {
        Self::RawAudio(AudioFormat {
            sample_rate: 0,
            channels: 0,
            sample_format,
        })
    }

    /// Registry id of this type's variant
    pub fn type_id(&self) -> &'static str {
        match self {
            Self::RawAudio(_) => "RawAudio",
            Self::OpusAudio => "OpusAudio",
            Self::Text => "Text",
            Self::Transcription => "Transcription",
            Self::Custom { .. } => "Custom",
            Self::Binary => "Binary",
            Self::Any => "Any",
            Self::Passthrough => "Passthrough",
        }
    }

    /// Structured payload for parameterized variants
    fn payload(&self) -> Option<serde_json::Map<String, serde_json::Value>> {
        let mut map = serde_json::Map::new();
        match self {
            Self::RawAudio(format) => {
                map.insert("sample_rate".into(), format.sample_rate.into());
                map.insert("channels".into(), format.channels.into());
                let sample_format = match format.sample_format {
                    SampleFormat::F32 => "F32",
                    SampleFormat::S16Le => "S16Le",
                };
                map.insert("sample_format".into(), sample_format.into());
            }
            Self::Custom { type_id } => {
                map.insert("type_id".into(), type_id.clone().into());
            }
            _ => return None,
        }
        Some(map)
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::Passthrough)
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RawAudio(format) => {
                let rate = if format.sample_rate == 0 {
                    "*".to_string()
                } else {
                    format.sample_rate.to_string()
                };
                let channels = if format.channels == 0 {
                    "*".to_string()
                } else {
                    format.channels.to_string()
                };
                write!(f, "Raw Audio ({}Hz, {}ch, {:?})", rate, channels, format.sample_format)
            }
            Self::Custom { type_id } => write!(f, "Custom ({})", type_id),
            other => f.write_str(other.type_id()),
        }
    }
}

/// Declarative field rule used by `StructFieldWildcard`
///
/// A field equal to `wildcard_value` on either side matches anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRule {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wildcard_value: Option<serde_json::Value>,
}

/// Compatibility strategy for a packet type id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Compatibility {
    /// Matches anything
    Any,
    /// Kinds must be identical
    Exact,
    /// Kinds must match and every listed field must be equal or wildcarded
    StructFieldWildcard { fields: Vec<FieldRule> },
}

/// Registry entry describing one packet type id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketTypeMeta {
    /// Variant identifier (e.g. "RawAudio")
    pub id: String,
    /// Human-friendly label
    pub label: String,
    /// Hex color for UIs
    pub color: String,
    /// Display template for struct payloads, `{field|*}` marks wildcard display
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_template: Option<String>,
    pub compatibility: Compatibility,
}

impl PacketTypeMeta {
    fn new(id: &str, label: &str, color: &str, compatibility: Compatibility) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            color: color.to_string(),
            display_template: None,
            compatibility,
        }
    }

    fn with_template(mut self, template: &str) -> Self {
        self.display_template = Some(template.to_string());
        self
    }
}

/// The built-in packet type registry
pub fn packet_type_registry() -> &'static [PacketTypeMeta] {
    static REGISTRY: OnceLock<Vec<PacketTypeMeta>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        vec![
            PacketTypeMeta::new("Any", "Any", "#96ceb4", Compatibility::Any),
            PacketTypeMeta::new("Binary", "Binary", "#45b7d1", Compatibility::Exact),
            PacketTypeMeta::new("Text", "Text", "#4ecdc4", Compatibility::Exact),
            PacketTypeMeta::new("OpusAudio", "Opus Audio", "#ff6b6b", Compatibility::Exact),
            PacketTypeMeta::new(
                "RawAudio",
                "Raw Audio",
                "#f39c12",
                Compatibility::StructFieldWildcard {
                    fields: vec![
                        FieldRule {
                            name: "sample_rate".into(),
                            wildcard_value: Some(serde_json::json!(0)),
                        },
                        FieldRule {
                            name: "channels".into(),
                            wildcard_value: Some(serde_json::json!(0)),
                        },
                        FieldRule {
                            name: "sample_format".into(),
                            wildcard_value: None,
                        },
                    ],
                },
            )
            .with_template("Raw Audio ({sample_rate|*}Hz, {channels|*}ch, {sample_format})"),
            PacketTypeMeta::new(
                "Transcription",
                "Transcription",
                "#9b59b6",
                Compatibility::Exact,
            ),
            PacketTypeMeta::new(
                "Custom",
                "Custom",
                "#e67e22",
                Compatibility::StructFieldWildcard {
                    fields: vec![FieldRule {
                        name: "type_id".into(),
                        wildcard_value: None,
                    }],
                },
            )
            .with_template("Custom ({type_id})"),
        ]
    })
}

fn find_meta<'a>(registry: &'a [PacketTypeMeta], id: &str) -> Option<&'a PacketTypeMeta> {
    registry.iter().find(|m| m.id == id)
}

/// Whether a concrete output type may feed an input that accepts `input`
///
/// - `Any` on either side matches
/// - otherwise type ids must match, then the registry strategy decides
/// - ids without registry metadata never match
///
/// `Passthrough` is not resolved here; callers resolve it first.
pub fn can_connect(output: &PacketType, input: &PacketType, registry: &[PacketTypeMeta]) -> bool {
    if output.is_any() || input.is_any() {
        return true;
    }
    if output.type_id() != input.type_id() {
        return false;
    }

    let Some(meta) = find_meta(registry, output.type_id()) else {
        return false;
    };

    match &meta.compatibility {
        Compatibility::Any | Compatibility::Exact => true,
        Compatibility::StructFieldWildcard { fields } => {
            let (Some(out_map), Some(in_map)) = (output.payload(), input.payload()) else {
                return false;
            };
            fields.iter().all(|rule| {
                let (Some(a), Some(b)) = (out_map.get(&rule.name), in_map.get(&rule.name)) else {
                    return false;
                };
                if let Some(wild) = &rule.wildcard_value {
                    if a == wild || b == wild {
                        return true;
                    }
                }
                a == b
            })
        }
    }
}

/// Test an output type against every type an input accepts
pub fn can_connect_any(
    output: &PacketType,
    accepts: &[PacketType],
    registry: &[PacketTypeMeta],
) -> bool {
    accepts.iter().any(|input| can_connect(output, input, registry))
}
