//! Error types for vector storage

use thiserror::Error;

/// Vector storage error type
#[derive(Error, Debug)]
pub enum VectorError {
    /// Counts or dimensions within one write disagree
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// An explicit dimension disagrees with the vector it accompanies
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The remote index rejected a request body as oversized
    #[error("Payload too large for {records} record(s)")]
    PayloadTooLarge { records: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Remote index unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Malformed record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    #[error("Remote index returned status {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VectorError {
    pub fn shape(message: impl Into<String>) -> Self {
        Self::ShapeMismatch(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::RemoteUnavailable(message.into())
    }

    pub fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            line,
            reason: reason.into(),
        }
    }

    /// Whether splitting the batch that produced this error could help
    pub fn is_payload_too_large(&self) -> bool {
        matches!(self, Self::PayloadTooLarge { .. })
    }
}

/// Result type for vector operations
pub type VectorResult<T> = Result<T, VectorError>;
