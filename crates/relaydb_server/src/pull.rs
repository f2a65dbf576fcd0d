//! Streaming bulk-pull producer.
//!
//! The pull stream opens with a snapshot header item carrying the newest
//! commit timestamp already reflected in the data, then walks the schema's
//! tables in a stable order. Each table opens with a text item carrying
//! its name, followed by blob items each holding one columnar row batch,
//! in ascending row-id order. The stream closes with the end marker.
//!
//! Clients resume by sending their per-table row offsets; a table absent
//! from the resume map was already completed by an earlier attempt and is
//! skipped entirely. A batch shorter than requested tells the client the
//! table is exhausted, so no explicit per-table terminator is needed.
//!
//! The producer is lazy: each chunk is scanned and encoded only when the
//! consumer asks for it, so the whole dataset is never held in memory.

use crate::config::PullConfig;
use crate::error::ServerResult;
use bytes::Bytes;
use relaydb_codec::{encode_row_batch, encoded_rows_size, FrameEncoder};
use relaydb_protocol::{snapshot_header, PullResume};
use relaydb_storage::StorageDriver;
use std::collections::VecDeque;
use tracing::debug;

/// Starts the pull stream for the given resume state.
///
/// `snapshot_ms` is the newest commit timestamp already covered by the
/// rows the stream will carry.
pub(crate) fn stream<'a, D: StorageDriver>(
    driver: &'a D,
    config: &'a PullConfig,
    schema: &[String],
    resume: &PullResume,
    snapshot_ms: i64,
) -> PullStream<'a, D> {
    let pending = schema
        .iter()
        .filter_map(|table| {
            resume
                .get(table.as_str())
                .map(|&offset| (table.clone(), offset))
        })
        .collect();
    PullStream {
        driver,
        config,
        encoder: FrameEncoder::new(),
        pending,
        cursor: None,
        header: Some(snapshot_ms),
        done: false,
    }
}

struct TableCursor {
    table: String,
    offset: u64,
    batch_rows: usize,
}

/// A lazy pull stream; each item is one framed chunk of the wire stream.
///
/// Chunk boundaries fall on item boundaries here, but clients must not
/// rely on that; the decoder reassembles items from arbitrary chunking.
/// The first error ends the stream.
pub struct PullStream<'a, D: StorageDriver> {
    driver: &'a D,
    config: &'a PullConfig,
    encoder: FrameEncoder,
    pending: VecDeque<(String, u64)>,
    cursor: Option<TableCursor>,
    header: Option<i64>,
    done: bool,
}

impl<D: StorageDriver> Iterator for PullStream<'_, D> {
    type Item = ServerResult<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let chunk = self.advance();
        if chunk.is_err() {
            self.done = true;
        }
        Some(chunk)
    }
}

impl<D: StorageDriver> PullStream<'_, D> {
    fn advance(&mut self) -> ServerResult<Bytes> {
        if let Some(snapshot_ms) = self.header.take() {
            self.encoder.text(&snapshot_header(snapshot_ms))?;
            return Ok(self.encoder.take());
        }

        if let Some(cursor) = self.cursor.as_mut() {
            let rows = self.driver.scan(&cursor.table, cursor.offset, cursor.batch_rows)?;
            let exhausted = rows.len() < cursor.batch_rows;
            self.encoder.blob(&encode_row_batch(&rows)?)?;
            debug!(
                table = %cursor.table,
                offset = cursor.offset,
                rows = rows.len(),
                "pull batch"
            );

            if exhausted {
                self.cursor = None;
            } else {
                cursor.offset += rows.len() as u64;
                // Adapt the next request to the observed row size.
                let avg = encoded_rows_size(&rows) / rows.len().max(1);
                cursor.batch_rows = self.config.clamp_rows(self.config.max_batch_bytes / avg.max(1));
            }
            return Ok(self.encoder.take());
        }

        if let Some((table, offset)) = self.pending.pop_front() {
            self.encoder.text(&table)?;
            let chunk = self.encoder.take();
            self.cursor = Some(TableCursor {
                table,
                offset,
                batch_rows: self.config.clamp_rows(self.config.initial_batch_rows),
            });
            return Ok(chunk);
        }

        self.done = true;
        self.encoder.end();
        Ok(self.encoder.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaydb_codec::{decode_row_batch, FrameDecoder, Row, StreamItem};
    use relaydb_storage::MemoryDriver;
    use serde_json::json;

    fn seed(driver: &MemoryDriver, table: &str, count: usize) {
        for i in 0..count {
            let mut row = Row::new();
            row.insert("id".into(), json!(format!("r{i:04}")));
            row.insert("n".into(), json!(i));
            driver.insert(table, row).unwrap();
        }
    }

    fn chunks(
        driver: &MemoryDriver,
        config: &PullConfig,
        schema: &[String],
        resume: &PullResume,
    ) -> Vec<Bytes> {
        stream(driver, config, schema, resume, 7)
            .collect::<ServerResult<Vec<_>>>()
            .unwrap()
    }

    fn decode_all(chunks: &[Bytes]) -> Vec<StreamItem> {
        let mut decoder = FrameDecoder::new();
        let mut items = Vec::new();
        for chunk in chunks {
            items.extend(decoder.feed(chunk).unwrap());
        }
        items
    }

    fn full_resume(tables: &[&str]) -> PullResume {
        tables.iter().map(|t| (t.to_string(), 0)).collect()
    }

    #[test]
    fn streams_tables_in_schema_order() {
        let driver = MemoryDriver::new();
        seed(&driver, "users", 3);
        seed(&driver, "posts", 2);
        let schema = vec!["users".to_string(), "posts".to_string()];

        let chunks = chunks(
            &driver,
            &PullConfig::default(),
            &schema,
            &full_resume(&["users", "posts"]),
        );
        let items = decode_all(&chunks);

        assert_eq!(items[0], StreamItem::Text(snapshot_header(7)));
        assert_eq!(items[1], StreamItem::Text("users".into()));
        let StreamItem::Blob(users) = &items[2] else {
            panic!("expected users batch");
        };
        assert_eq!(decode_row_batch(users).unwrap().len(), 3);
        assert_eq!(items[3], StreamItem::Text("posts".into()));
        assert_eq!(items.last(), Some(&StreamItem::End));
    }

    #[test]
    fn completed_tables_are_skipped() {
        let driver = MemoryDriver::new();
        seed(&driver, "users", 2);
        seed(&driver, "posts", 2);
        let schema = vec!["users".to_string(), "posts".to_string()];

        let chunks = chunks(
            &driver,
            &PullConfig::default(),
            &schema,
            &full_resume(&["posts"]),
        );
        let items = decode_all(&chunks);
        assert!(!items.contains(&StreamItem::Text("users".into())));
        assert_eq!(items[1], StreamItem::Text("posts".into()));
    }

    #[test]
    fn resume_offset_skips_delivered_rows() {
        let driver = MemoryDriver::new();
        seed(&driver, "users", 5);
        let schema = vec!["users".to_string()];
        let resume: PullResume = [("users".to_string(), 3)].into();

        let chunks = chunks(&driver, &PullConfig::default(), &schema, &resume);
        let items = decode_all(&chunks);
        let StreamItem::Blob(bytes) = &items[2] else {
            panic!("expected batch");
        };
        let rows = decode_row_batch(bytes).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("id"), Some(&json!("r0003")));
    }

    #[test]
    fn large_tables_split_into_multiple_batches() {
        let driver = MemoryDriver::new();
        seed(&driver, "users", 7);
        let schema = vec!["users".to_string()];

        let config = PullConfig {
            max_batch_bytes: 1,
            min_batch_rows: 2,
            max_batch_rows: 2,
            initial_batch_rows: 2,
        };
        let chunks = chunks(&driver, &config, &schema, &full_resume(&["users"]));
        let items = decode_all(&chunks);

        let batches: Vec<Vec<Row>> = items
            .iter()
            .filter_map(|item| match item {
                StreamItem::Blob(b) => Some(decode_row_batch(b).unwrap()),
                _ => None,
            })
            .collect();
        // Three full batches of two, then a short batch signalling the end.
        assert_eq!(
            batches.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![2, 2, 2, 1]
        );
        let all: Vec<&Row> = batches.iter().flatten().collect();
        assert_eq!(all.len(), 7);
        assert_eq!(all[6].get("id"), Some(&json!("r0006")));
    }

    #[test]
    fn rows_are_scanned_on_demand_not_up_front() {
        let driver = MemoryDriver::new();
        seed(&driver, "users", 4);
        let schema = vec!["users".to_string()];
        let config = PullConfig {
            max_batch_bytes: 1,
            min_batch_rows: 2,
            max_batch_rows: 2,
            initial_batch_rows: 2,
        };

        let mut stream = stream(&driver, &config, &schema, &full_resume(&["users"]), 0);
        stream.next().unwrap().unwrap(); // header
        stream.next().unwrap().unwrap(); // table name

        // Rows written after the stream started but before their batch is
        // requested still make it out: nothing was buffered ahead.
        let mut late = Row::new();
        late.insert("id".into(), json!("r9999"));
        driver.insert("users", late).unwrap();

        let rest: Vec<Bytes> = stream.collect::<ServerResult<Vec<_>>>().unwrap();
        let rows: usize = decode_all(&rest)
            .iter()
            .filter_map(|item| match item {
                StreamItem::Blob(b) => Some(decode_row_batch(b).unwrap().len()),
                _ => None,
            })
            .sum();
        assert_eq!(rows, 5);
    }

    #[test]
    fn empty_resume_yields_header_and_end_marker() {
        let driver = MemoryDriver::new();
        seed(&driver, "users", 2);
        let schema = vec!["users".to_string()];

        let chunks = chunks(&driver, &PullConfig::default(), &schema, &PullResume::new());
        assert_eq!(
            decode_all(&chunks),
            vec![StreamItem::Text(snapshot_header(7)), StreamItem::End]
        );
    }
}
