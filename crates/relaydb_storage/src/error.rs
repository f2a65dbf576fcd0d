//! Error types for storage drivers.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in a storage driver.
#[derive(Error, Debug)]
pub enum StorageError {
    /// A row was written without a string `"id"` column.
    #[error("row in table '{table}' has no string id column")]
    MissingId {
        /// The target table.
        table: String,
    },

    /// An insert targeted an id that already exists.
    #[error("duplicate id '{id}' in table '{table}'")]
    DuplicateId {
        /// The target table.
        table: String,
        /// The conflicting primary key.
        id: String,
    },

    /// The underlying driver failed.
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StorageError::DuplicateId {
            table: "users".into(),
            id: "u1".into(),
        };
        assert!(err.to_string().contains("users"));
        assert!(err.to_string().contains("u1"));
    }
}
