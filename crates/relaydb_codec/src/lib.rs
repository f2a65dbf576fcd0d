//! # RelayDB Codec
//!
//! Wire codecs for the RelayDB bulk-pull channel, plus the base row types
//! shared by every other crate.
//!
//! This crate provides:
//! - A self-delimiting frame codec for the pull byte stream
//!   ([`FrameEncoder`] / [`FrameDecoder`])
//! - Columnar row-batch encoding ([`encode_row_batch`] /
//!   [`decode_row_batch`])
//! - The [`Row`] and [`RowPatch`] data-model types
//!
//! ## Frame format
//!
//! The pull stream is a sequence of self-delimiting items:
//!
//! - `0x00`: string item, 1 length byte (0-255) + that many UTF-8 bytes
//! - `0x01`: blob item, 4-byte little-endian length + raw bytes
//! - `0xFF`: end-of-stream marker, terminates the whole stream
//!
//! The decoder is incremental: it accepts raw chunks of arbitrary size
//! whose boundaries need not align with item boundaries, and yields
//! completed items as soon as enough bytes have accumulated.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod error;
mod row;
mod stream;

pub use batch::{decode_row_batch, encode_row_batch, encoded_rows_size};
pub use error::{CodecError, CodecResult};
pub use row::{merge_patch, row_id, Row, RowPatch};
pub use stream::{FrameDecoder, FrameEncoder, StreamItem, TAG_BLOB, TAG_END, TAG_TEXT};
