//! Node lifecycle states reported by the runtime

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::reasons;

/// Why a node stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum StopReason {
    /// Finite source reached end of input
    Completed,
    /// Upstream closed, no more packets will arrive
    InputClosed,
    /// Downstream closed, no consumer left
    OutputClosed,
    /// Explicit shutdown requested
    Shutdown,
    /// Node has no inputs connected
    NoInputs,
    /// Anything the engine does not recognise
    Unknown,
}

impl From<&str> for StopReason {
    fn from(value: &str) -> Self {
        match value {
            "completed" => Self::Completed,
            "input_closed" => Self::InputClosed,
            "output_closed" => Self::OutputClosed,
            "shutdown" | "shutdown_requested" => Self::Shutdown,
            "no_inputs" => Self::NoInputs,
            _ => Self::Unknown,
        }
    }
}

impl From<String> for StopReason {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

/// Lifecycle state of a node instance
///
/// Owned by the runtime state mirror; the staging overlay never changes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum NodeState {
    #[default]
    Initializing,
    Ready,
    Running,
    Recovering {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
    Degraded {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
    Failed {
        reason: String,
    },
    Stopped {
        reason: StopReason,
    },
}

impl NodeState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Recovering { .. } => "recovering",
            Self::Degraded { .. } => "degraded",
            Self::Failed { .. } => "failed",
            Self::Stopped { .. } => "stopped",
        }
    }

    /// `Failed` and `Stopped` end the instance's lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Stopped { .. })
    }

    /// Whether the runtime may move a node from `self` to `next`
    ///
    /// Terminal states only allow `Failed -> Stopped`.
    pub fn can_transition_to(&self, next: &NodeState) -> bool {
        match self {
            Self::Stopped { .. } => false,
            Self::Failed { .. } => matches!(next, Self::Stopped { .. }),
            _ => true,
        }
    }

    /// Parsed `slow_input_timeout` details, if this is that kind of degradation
    pub fn slow_input_details(&self) -> Option<SlowInputDetails> {
        match self {
            Self::Degraded { reason, details } if reason == reasons::SLOW_INPUT_TIMEOUT => {
                match details {
                    Some(value) => match serde_json::from_value(value.clone()) {
                        Ok(parsed) => Some(parsed),
                        Err(e) => {
                            log::warn!("Malformed slow_input_timeout details: {}", e);
                            Some(SlowInputDetails::default())
                        }
                    },
                    None => Some(SlowInputDetails::default()),
                }
            }
            _ => None,
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recovering { reason, .. } | Self::Degraded { reason, .. } | Self::Failed { reason } => {
                write!(f, "{} ({})", self.label(), reason)
            }
            Self::Stopped { reason } => write!(f, "stopped ({:?})", reason),
            _ => f.write_str(self.label()),
        }
    }
}

/// Standardized payload of `Degraded { reason: "slow_input_timeout" }`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowInputDetails {
    #[serde(default)]
    pub slow_pins: Vec<String>,
    #[serde(default)]
    pub newly_slow_pins: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_timeout_ms: Option<u64>,
}
