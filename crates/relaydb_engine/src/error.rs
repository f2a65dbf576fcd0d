//! Error types for the client sync engine.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in the client sync engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The backing storage driver failed.
    #[error("storage error: {0}")]
    Storage(#[from] relaydb_storage::StorageError),

    /// A pull payload failed to decode.
    #[error("codec error: {0}")]
    Codec(#[from] relaydb_codec::CodecError),

    /// A persisted protocol value failed to (de)serialize.
    #[error("protocol error: {0}")]
    Protocol(#[from] relaydb_protocol::ProtocolError),

    /// A write targeted a reserved bookkeeping table.
    #[error("table '{0}' is reserved")]
    ReservedTable(String),

    /// A write targeted a table the replica does not sync.
    #[error("table '{0}' is not part of the synced schema")]
    UnknownTable(String),

    /// The write policy refused a local write.
    #[error("write to table '{table}' refused: {reason}")]
    PolicyDenied {
        /// The table the write targeted.
        table: String,
        /// The policy's reason.
        reason: String,
    },

    /// An update targeted a row that does not exist locally.
    #[error("row '{id}' not found in table '{table}'")]
    RowNotFound {
        /// The table searched.
        table: String,
        /// The missing row id.
        id: String,
    },

    /// A persisted bookkeeping row was malformed.
    #[error("corrupt bookkeeping row in table '{table}': {detail}")]
    CorruptRow {
        /// The bookkeeping table.
        table: String,
        /// What was wrong.
        detail: String,
    },
}
