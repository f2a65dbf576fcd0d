//! Error types for the sync server.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while serving sync requests.
///
/// Batch rejections are not errors: they are reported through
/// [`relaydb_protocol::SendOutcome::failed`]. These variants cover faults
/// of the server itself.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The backing storage driver failed.
    #[error("storage error: {0}")]
    Storage(#[from] relaydb_storage::StorageError),

    /// A wire payload failed to encode.
    #[error("codec error: {0}")]
    Codec(#[from] relaydb_codec::CodecError),

    /// A persisted protocol value failed to (de)serialize.
    #[error("protocol error: {0}")]
    Protocol(#[from] relaydb_protocol::ProtocolError),

    /// A persisted bookkeeping row was malformed.
    #[error("corrupt bookkeeping row in table '{table}': {detail}")]
    CorruptRow {
        /// The bookkeeping table.
        table: String,
        /// What was wrong.
        detail: String,
    },
}
