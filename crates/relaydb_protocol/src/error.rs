//! Error types for protocol (de)serialization.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while handling protocol types.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A protocol value failed to serialize.
    #[error("serialize error: {0}")]
    Serialize(String),

    /// A serialized protocol value failed to parse.
    #[error("deserialize error: {0}")]
    Deserialize(String),

    /// A batch id string was not a valid UUID.
    #[error("invalid batch id '{0}'")]
    InvalidBatchId(String),
}
