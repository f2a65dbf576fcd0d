//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The stream contained an unknown item tag.
    #[error("unknown stream tag 0x{0:02x}")]
    UnknownTag(u8),

    /// A string item did not contain valid UTF-8.
    #[error("string item is not valid UTF-8")]
    InvalidUtf8,

    /// A string item exceeds the 255-byte length limit.
    #[error("string item too long: {len} bytes (max 255)")]
    TextTooLong {
        /// The attempted length in bytes.
        len: usize,
    },

    /// A blob item exceeds the 4-byte length field.
    #[error("blob item too long: {len} bytes")]
    BlobTooLong {
        /// The attempted length in bytes.
        len: usize,
    },

    /// Bytes arrived after the end-of-stream marker.
    #[error("unexpected data after end-of-stream marker")]
    TrailingData,

    /// A row batch failed to (de)serialize.
    #[error("row batch codec error: {0}")]
    RowBatch(String),

    /// A row batch had mismatched column lengths.
    #[error("malformed row batch: column {column} has {got} values, expected {expected}")]
    ColumnMismatch {
        /// Name of the offending column.
        column: String,
        /// Number of values found.
        got: usize,
        /// Number of values expected (one per row).
        expected: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CodecError::UnknownTag(0x7c);
        assert_eq!(err.to_string(), "unknown stream tag 0x7c");

        let err = CodecError::TextTooLong { len: 300 };
        assert!(err.to_string().contains("300"));
    }
}
