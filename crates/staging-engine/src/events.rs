//! Event types for streaming staging activity
//!
//! Events are sent from the engine to a UI (or any consumer) whenever a
//! target changes mode, its overlay changes, a commit resolves, or the
//! runtime mirror observes a state or structure change.

use serde::{Deserialize, Serialize};

use crate::state::NodeState;

/// Trait for sending staging events
///
/// Abstracts over the transport (mpsc, websocket, test collector, ...).
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be delivered (e.g. channel closed)
    fn send(&self, event: StagingEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Edit mode of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditMode {
    Monitor,
    Staging,
}

/// Events emitted by the staging service and the runtime mirror
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StagingEvent {
    /// Target switched between monitor and staging
    #[serde(rename_all = "camelCase")]
    ModeChanged { target: String, mode: EditMode },

    /// Overlay content changed
    #[serde(rename_all = "camelCase")]
    OverlayChanged { target: String, version: u64 },

    /// A coalesced param write was applied to the staged graph
    #[serde(rename_all = "camelCase")]
    ParamsCoalesced {
        target: String,
        node_id: String,
        params: serde_json::Value,
    },

    /// The runtime accepted a commit batch
    #[serde(rename_all = "camelCase")]
    CommitSucceeded { target: String, operations: usize },

    /// The commit was blocked or rejected; the overlay is unchanged
    #[serde(rename_all = "camelCase")]
    CommitFailed { target: String, errors: Vec<String> },

    /// The mirror recorded a lifecycle change
    #[serde(rename_all = "camelCase")]
    NodeStateChanged {
        target: String,
        node_id: String,
        state: NodeState,
    },

    /// Node or connection membership of the live graph changed
    #[serde(rename_all = "camelCase")]
    StructureChanged { target: String, signature: String },
}

impl StagingEvent {
    pub fn overlay_changed(target: &str, version: u64) -> Self {
        Self::OverlayChanged {
            target: target.to_string(),
            version,
        }
    }

    pub fn mode_changed(target: &str, mode: EditMode) -> Self {
        Self::ModeChanged {
            target: target.to_string(),
            mode,
        }
    }
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: StagingEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful in tests to verify what was emitted.
pub struct VecEventSink {
    events: parking_lot::Mutex<Vec<StagingEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<StagingEvent> {
        self.events.lock().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: StagingEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Forwards events into a tokio channel
pub struct ChannelEventSink {
    tx: tokio::sync::mpsc::UnboundedSender<StagingEvent>,
}

impl ChannelEventSink {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<StagingEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelEventSink {
    fn send(&self, event: StagingEvent) -> Result<(), EventError> {
        self.tx.send(event).map_err(|_| EventError::channel_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_event_sink() {
        let sink = VecEventSink::new();
        sink.send(StagingEvent::overlay_changed("session-1", 3)).unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            StagingEvent::OverlayChanged { target, version } => {
                assert_eq!(target, "session-1");
                assert_eq!(*version, 3);
            }
            _ => panic!("Expected OverlayChanged event"),
        }

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_event_wire_shape() {
        let json = serde_json::to_value(StagingEvent::mode_changed("s", EditMode::Staging)).unwrap();
        assert_eq!(json["type"], "modeChanged");
        assert_eq!(json["mode"], "staging");
    }

    #[test]
    fn test_channel_sink_closed() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ChannelEventSink::new(tx);
        sink.send(StagingEvent::overlay_changed("s", 1)).unwrap();
        drop(rx);
        assert!(sink.send(StagingEvent::overlay_changed("s", 2)).is_err());
    }
}
