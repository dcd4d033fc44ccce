//! Error types for the staging engine

use thiserror::Error;

use crate::compat::ConnectionRejection;
use crate::validation::ValidationError;

/// Result type alias using StagingError
pub type Result<T> = std::result::Result<T, StagingError>;

/// Errors that can occur while staging, validating or committing a pipeline
#[derive(Debug, Error)]
pub enum StagingError {
    /// No overlay or mirror exists for the requested target
    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    /// The operation requires staging mode but the target is monitoring
    #[error("Target '{0}' is not in staging mode")]
    NotStaging(String),

    /// The operation requires monitor mode but the target is staging
    #[error("Target '{0}' is in staging mode")]
    AlreadyStaging(String),

    /// A referenced node does not exist
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    /// A node references a kind the catalog does not know
    #[error("Unknown node kind '{kind}' for node '{node_id}'")]
    UnknownKind { node_id: String, kind: String },

    /// A referenced connection does not exist
    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    /// A node id is already taken
    #[error("Node '{0}' already exists")]
    DuplicateNode(String),

    /// The compatibility checker refused a connection
    #[error("Connection rejected: {0}")]
    ConnectionRejected(#[from] ConnectionRejection),

    /// A live parameter edit failed schema validation
    #[error("Invalid tune for '{node_id}.{key}': {message}")]
    InvalidTune {
        node_id: String,
        key: String,
        message: String,
    },

    /// A declarative import could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Commit blocked by validation errors
    #[error("Commit blocked by {} validation error(s)", .0.len())]
    ValidationFailed(Vec<ValidationError>),

    /// The runtime refused the batch
    #[error("Runtime rejected batch: {}", .0.join("; "))]
    CommitRejected(Vec<String>),

    /// The runtime channel itself failed
    #[error("Runtime channel error: {0}")]
    Runtime(String),

    /// A result arrived for an overlay that has since been discarded
    #[error("Stale result for target '{0}'")]
    Stale(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StagingError {
    /// Create a parse error with a message
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a runtime channel error with a message
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Whether the failure left the overlay usable for a retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ValidationFailed(_) | Self::CommitRejected(_) | Self::Runtime(_)
        )
    }
}
