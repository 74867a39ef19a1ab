//! Error types for the Pub/Sub sink.
//!
//! A single error type covers configuration parsing, record validation,
//! transport failures and runtime errors. Only connection errors are
//! considered retriable; everything else is either permanent for the record
//! that caused it or fatal for the task that observed it.

use thiserror::Error;

/// Errors that can occur while batching and publishing records.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error (file, network, etc).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Failed to reach the Pub/Sub endpoint.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// A record was rejected because its payload has the wrong schema or type.
    ///
    /// Permanent for the offending record; other partitions are unaffected.
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// A publish request failed. Fatal for the task that issued it.
    #[error("Publish to '{topic}' failed for batch of {messages} messages: {reason}")]
    TransportError {
        /// Destination topic path.
        topic: String,
        /// Number of messages in the failed request.
        messages: usize,
        /// Underlying failure.
        reason: String,
    },

    /// Error in the connector runtime.
    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

impl SinkError {
    /// Whether retrying the same operation may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, SinkError::ConnectionError(_))
    }
}

/// Result type alias for sink operations.
pub type Result<T> = std::result::Result<T, SinkError>;

impl From<serde_json::Error> for SinkError {
    fn from(e: serde_json::Error) -> Self {
        SinkError::SerializationError(e.to_string())
    }
}
