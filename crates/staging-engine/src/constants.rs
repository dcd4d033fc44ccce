//! Engine-wide constants
//!
//! Single source of truth for delays, layout metrics and limits.

/// Default values for staging behaviour
pub mod defaults {
    /// Quiet period before coalesced param writes are applied
    pub const COALESCE_DELAY_MS: u64 = 300;
    /// Number of overlay snapshots kept for undo
    pub const UNDO_DEPTH: usize = 50;
    /// File name used by `StagingConfig::load`/`save`
    pub const CONFIG_FILE: &str = "staging.json";
    /// Parameter injected into fan-in nodes at commit time
    pub const FAN_IN_PARAM: &str = "num_inputs";
}

/// Auto-layout metrics (canvas units)
pub mod layout {
    /// Gap between nodes sharing a level
    pub const HORIZONTAL_GAP: f64 = 40.0;
    /// Gap between level bands
    pub const VERTICAL_GAP: f64 = 80.0;
    /// Width used when no measured size is known
    pub const NODE_WIDTH: f64 = 220.0;
    /// Height used when neither a measured size nor a per-kind height is known
    pub const NODE_HEIGHT: f64 = 120.0;
}

/// Pin naming conventions
pub mod pins {
    /// Conventional primary input pin
    pub const IN: &str = "in";
    /// Conventional primary output pin
    pub const OUT: &str = "out";
}

/// Degraded reasons with a standardized `details` payload
pub mod reasons {
    /// A fan-in node timed out waiting on one or more inputs
    pub const SLOW_INPUT_TIMEOUT: &str = "slow_input_timeout";
}

/// Hard limits
pub mod limits {
    /// Capacity of the runtime event ingestion channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 1024;
}
