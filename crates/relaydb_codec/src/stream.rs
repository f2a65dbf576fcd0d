//! Frame codec for the bulk-pull byte stream.

use crate::error::{CodecError, CodecResult};
use bytes::{Bytes, BytesMut};

/// Tag byte for a string item.
pub const TAG_TEXT: u8 = 0x00;
/// Tag byte for a byte-array item.
pub const TAG_BLOB: u8 = 0x01;
/// Tag byte for the end-of-stream marker.
pub const TAG_END: u8 = 0xFF;

/// A completed item decoded from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// A string item (a table name on the pull channel).
    Text(String),
    /// A byte-array item (a columnar row batch on the pull channel).
    Blob(Bytes),
    /// The end-of-stream marker.
    End,
}

/// Encodes stream items into a contiguous byte buffer.
#[derive(Debug, Default)]
pub struct FrameEncoder {
    buf: BytesMut,
}

impl FrameEncoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Appends a string item.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TextTooLong`] if the string exceeds 255 bytes.
    pub fn text(&mut self, s: &str) -> CodecResult<()> {
        let len = s.len();
        if len > u8::MAX as usize {
            return Err(CodecError::TextTooLong { len });
        }
        self.buf.extend_from_slice(&[TAG_TEXT, len as u8]);
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    /// Appends a byte-array item.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::BlobTooLong`] if the payload exceeds `u32::MAX`
    /// bytes.
    pub fn blob(&mut self, data: &[u8]) -> CodecResult<()> {
        let len = data.len();
        let len32 = u32::try_from(len).map_err(|_| CodecError::BlobTooLong { len })?;
        self.buf.extend_from_slice(&[TAG_BLOB]);
        self.buf.extend_from_slice(&len32.to_le_bytes());
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Appends the end-of-stream marker.
    pub fn end(&mut self) {
        self.buf.extend_from_slice(&[TAG_END]);
    }

    /// Takes the bytes accumulated so far, leaving the encoder empty.
    ///
    /// Producers call this between items to emit the stream in chunks
    /// without holding the whole payload in memory.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Consumes the encoder, returning all accumulated bytes.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Incremental decoder for the frame stream.
///
/// Chunks are fed in as they arrive from the network; item boundaries need
/// not align with chunk boundaries, and a single item may span arbitrarily
/// many chunks. Completed items are yielded as soon as enough bytes have
/// accumulated, so the full stream is never buffered.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    finished: bool,
}

impl FrameDecoder {
    /// Creates a decoder awaiting the first chunk.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            finished: false,
        }
    }

    /// Feeds one chunk and returns every item completed by it.
    ///
    /// # Errors
    ///
    /// Returns an error on an unknown tag, invalid UTF-8 in a string item,
    /// or any data arriving after the end-of-stream marker. After an error
    /// the decoder state is unspecified and the stream must be restarted.
    pub fn feed(&mut self, chunk: &[u8]) -> CodecResult<Vec<StreamItem>> {
        if self.finished && !chunk.is_empty() {
            return Err(CodecError::TrailingData);
        }
        self.buf.extend_from_slice(chunk);

        let mut items = Vec::new();
        while let Some(item) = self.try_next()? {
            let is_end = item == StreamItem::End;
            items.push(item);
            if is_end {
                self.finished = true;
                if !self.buf.is_empty() {
                    return Err(CodecError::TrailingData);
                }
                break;
            }
        }
        Ok(items)
    }

    /// Returns true once the end-of-stream marker has been decoded.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of bytes buffered awaiting completion of the next item.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn try_next(&mut self) -> CodecResult<Option<StreamItem>> {
        let Some(&tag) = self.buf.first() else {
            return Ok(None);
        };

        match tag {
            TAG_TEXT => {
                if self.buf.len() < 2 {
                    return Ok(None);
                }
                let len = self.buf[1] as usize;
                if self.buf.len() < 2 + len {
                    return Ok(None);
                }
                let _ = self.buf.split_to(2);
                let body = self.buf.split_to(len);
                let text =
                    std::str::from_utf8(&body).map_err(|_| CodecError::InvalidUtf8)?;
                Ok(Some(StreamItem::Text(text.to_string())))
            }
            TAG_BLOB => {
                if self.buf.len() < 5 {
                    return Ok(None);
                }
                let len = u32::from_le_bytes([
                    self.buf[1],
                    self.buf[2],
                    self.buf[3],
                    self.buf[4],
                ]) as usize;
                if self.buf.len() < 5 + len {
                    return Ok(None);
                }
                let _ = self.buf.split_to(5);
                let body = self.buf.split_to(len).freeze();
                Ok(Some(StreamItem::Blob(body)))
            }
            TAG_END => {
                let _ = self.buf.split_to(1);
                Ok(Some(StreamItem::End))
            }
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}
