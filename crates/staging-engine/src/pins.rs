//! Pin declarations
//!
//! Pins belong to a node kind, not to an instance. An input declares which
//! packet types it accepts and how many connections it takes; an output
//! declares the single type it produces.

use serde::{Deserialize, Serialize};

use crate::packet::PacketType;

/// How many connections a pin may carry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinCardinality {
    /// Exactly one connection
    One,
    /// Any number of outgoing connections, each receiving a copy
    Broadcast,
    /// Template for pins created on demand as `{prefix}_{index}`
    Dynamic { prefix: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputPin {
    pub name: String,
    pub accepts_types: Vec<PacketType>,
    pub cardinality: PinCardinality,
}

impl InputPin {
    /// Single-connection input
    pub fn one(name: impl Into<String>, accepts_types: Vec<PacketType>) -> Self {
        Self {
            name: name.into(),
            accepts_types,
            cardinality: PinCardinality::One,
        }
    }

    /// Dynamic input family, template named `name`
    pub fn dynamic(
        name: impl Into<String>,
        prefix: impl Into<String>,
        accepts_types: Vec<PacketType>,
    ) -> Self {
        Self {
            name: name.into(),
            accepts_types,
            cardinality: PinCardinality::Dynamic {
                prefix: prefix.into(),
            },
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.cardinality, PinCardinality::Dynamic { .. })
    }

    /// Concrete index if `pin_name` is an instance of this dynamic family
    pub fn dynamic_index(&self, pin_name: &str) -> Option<u32> {
        let PinCardinality::Dynamic { prefix } = &self.cardinality else {
            return None;
        };
        let digits = pin_name.strip_prefix(prefix.as_str())?.strip_prefix('_')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    /// Whether a connection naming `pin_name` lands on this declaration
    pub fn matches(&self, pin_name: &str) -> bool {
        self.name == pin_name || self.dynamic_index(pin_name).is_some()
    }

    /// Concrete name for index `index` of a dynamic family
    pub fn instance_name(&self, index: u32) -> Option<String> {
        match &self.cardinality {
            PinCardinality::Dynamic { prefix } => Some(format!("{}_{}", prefix, index)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputPin {
    pub name: String,
    pub produces_type: PacketType,
    pub cardinality: PinCardinality,
}

impl OutputPin {
    pub fn broadcast(name: impl Into<String>, produces_type: PacketType) -> Self {
        Self {
            name: name.into(),
            produces_type,
            cardinality: PinCardinality::Broadcast,
        }
    }

    pub fn one(name: impl Into<String>, produces_type: PacketType) -> Self {
        Self {
            name: name.into(),
            produces_type,
            cardinality: PinCardinality::One,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_matching() {
        let pin = InputPin::dynamic("in", "in", vec![PacketType::Any]);
        assert!(pin.matches("in"));
        assert!(pin.matches("in_0"));
        assert!(pin.matches("in_12"));
        assert!(!pin.matches("in_"));
        assert!(!pin.matches("in_x"));
        assert!(!pin.matches("input_0"));
        assert_eq!(pin.dynamic_index("in_7"), Some(7));
        assert_eq!(pin.instance_name(3).as_deref(), Some("in_3"));
    }

    #[test]
    fn test_static_pin_matching() {
        let pin = InputPin::one("in", vec![PacketType::Text]);
        assert!(pin.matches("in"));
        assert!(!pin.matches("in_0"));
        assert!(pin.instance_name(0).is_none());
    }
}
