//! Client side of the bulk pull: stream consumption and row landing.
//!
//! Chunks from the transport are fed through the frame decoder; each
//! decoded row batch commits together with its progress advance in one
//! transaction. If the stream dies or a frame is malformed, the attempt
//! is abandoned; everything committed so far stays committed, and the
//! next attempt resumes from the persisted offsets.

use crate::error::{EngineError, EngineResult};
use crate::local::with_txn;
use crate::progress;
use bytes::Bytes;
use relaydb_codec::{decode_row_batch, row_id, FrameDecoder, StreamItem};
use relaydb_protocol::parse_snapshot_header;
use relaydb_storage::StorageDriver;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Consumes one pull stream.
///
/// Returns `Ok(true)` when the end marker arrived and the snapshot is
/// complete, `Ok(false)` when the stream closed early. Errors mean a
/// malformed stream; the caller retries either way.
pub(crate) async fn consume<D: StorageDriver>(
    driver: &D,
    schema: &[String],
    chunks: &mut mpsc::Receiver<Bytes>,
) -> EngineResult<bool> {
    let mut decoder = FrameDecoder::new();
    let mut current: Option<String> = None;

    while let Some(chunk) = chunks.recv().await {
        for item in decoder.feed(&chunk)? {
            match item {
                StreamItem::Text(table) => {
                    if let Some(baseline_ms) = parse_snapshot_header(&table) {
                        // The snapshot already covers commits up to this
                        // point; catch-up starts here, not at zero.
                        progress::set_snapshot_baseline(driver, baseline_ms)?;
                        continue;
                    }
                    if !schema.contains(&table) {
                        return Err(EngineError::UnknownTable(table));
                    }
                    debug!(table = %table, "pull stream opened table");
                    current = Some(table);
                }
                StreamItem::Blob(bytes) => {
                    let Some(table) = current.as_deref() else {
                        return Err(EngineError::CorruptRow {
                            table: progress::PROGRESS_TABLE.into(),
                            detail: "row batch arrived before any table name".into(),
                        });
                    };
                    land_batch(driver, table, &bytes)?;
                }
                StreamItem::End => {
                    // The stream covered every table the resume state
                    // asked for; anything it skipped was already done.
                    with_txn(driver, |txn| {
                        for table in schema {
                            progress::mark_complete(txn, table)?;
                        }
                        Ok(())
                    })?;
                    info!("bulk pull complete");
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

/// Commits one row batch and its progress advance atomically.
fn land_batch<D: StorageDriver>(driver: &D, table: &str, bytes: &[u8]) -> EngineResult<()> {
    let rows = decode_row_batch(bytes)?;
    if rows.is_empty() {
        return Ok(());
    }
    let count = rows.len() as u64;
    with_txn(driver, |txn| {
        for row in rows {
            if row_id(&row).is_some() {
                txn.upsert(table, row)?;
            }
        }
        progress::advance(txn, table, count)
    })?;
    debug!(table = %table, rows = count, "pull batch landed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaydb_codec::{encode_row_batch, FrameEncoder, Row};
    use relaydb_storage::MemoryDriver;
    use serde_json::json;

    fn row(id: &str) -> Row {
        let mut r = Row::new();
        r.insert("id".into(), json!(id));
        r
    }

    fn schema() -> Vec<String> {
        vec!["users".to_string(), "posts".to_string()]
    }

    async fn feed(chunks: Vec<Bytes>) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            tx.send(chunk).await.unwrap();
        }
        rx
    }

    #[tokio::test]
    async fn full_stream_lands_rows_and_completes() {
        let driver = MemoryDriver::new();
        let mut encoder = FrameEncoder::new();
        encoder.text("users").unwrap();
        encoder
            .blob(&encode_row_batch(&[row("a"), row("b")]).unwrap())
            .unwrap();
        encoder.text("posts").unwrap();
        encoder.blob(&encode_row_batch(&[row("p")]).unwrap()).unwrap();
        encoder.end();

        let mut rx = feed(vec![encoder.into_bytes()]).await;
        let complete = consume(&driver, &schema(), &mut rx).await.unwrap();

        assert!(complete);
        assert_eq!(driver.count("users").unwrap(), 2);
        assert_eq!(driver.count("posts").unwrap(), 1);
        assert!(progress::resume_state(&driver, &schema()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn truncated_stream_keeps_partial_progress() {
        let driver = MemoryDriver::new();
        let mut encoder = FrameEncoder::new();
        encoder.text("users").unwrap();
        encoder
            .blob(&encode_row_batch(&[row("a"), row("b")]).unwrap())
            .unwrap();
        // No end marker: the connection died.

        let mut rx = feed(vec![encoder.into_bytes()]).await;
        let complete = consume(&driver, &schema(), &mut rx).await.unwrap();

        assert!(!complete);
        assert_eq!(driver.count("users").unwrap(), 2);
        let resume = progress::resume_state(&driver, &schema()).unwrap();
        assert_eq!(resume.get("users"), Some(&2));
        assert_eq!(resume.get("posts"), Some(&0));
    }

    #[tokio::test]
    async fn snapshot_header_seeds_the_catch_up_baseline() {
        let driver = MemoryDriver::new();
        let mut encoder = FrameEncoder::new();
        encoder
            .text(&relaydb_protocol::snapshot_header(500))
            .unwrap();
        encoder.text("users").unwrap();
        encoder.blob(&encode_row_batch(&[row("a")]).unwrap()).unwrap();
        encoder.end();

        let mut rx = feed(vec![encoder.into_bytes()]).await;
        assert!(consume(&driver, &schema(), &mut rx).await.unwrap());
        assert_eq!(progress::last_server_timestamp(&driver).unwrap(), 500);

        // A retried pull carries a newer header; the baseline holds, so
        // commits between the two attempts are still replayed.
        let mut encoder = FrameEncoder::new();
        encoder
            .text(&relaydb_protocol::snapshot_header(900))
            .unwrap();
        encoder.end();
        let mut rx = feed(vec![encoder.into_bytes()]).await;
        assert!(consume(&driver, &schema(), &mut rx).await.unwrap());
        assert_eq!(progress::last_server_timestamp(&driver).unwrap(), 500);
    }

    #[tokio::test]
    async fn unknown_table_aborts_the_attempt() {
        let driver = MemoryDriver::new();
        let mut encoder = FrameEncoder::new();
        encoder.text("_mutation_queue").unwrap();

        let mut rx = feed(vec![encoder.into_bytes()]).await;
        let err = consume(&driver, &schema(), &mut rx).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownTable(_)));
    }

    #[tokio::test]
    async fn garbage_chunk_aborts_without_corrupting_progress() {
        let driver = MemoryDriver::new();
        let mut encoder = FrameEncoder::new();
        encoder.text("users").unwrap();
        encoder.blob(&encode_row_batch(&[row("a")]).unwrap()).unwrap();
        let good = encoder.into_bytes();

        let mut rx = feed(vec![good, Bytes::from_static(&[0x7E, 0x00])]).await;
        assert!(consume(&driver, &schema(), &mut rx).await.is_err());

        // The committed batch survives the failed attempt.
        let resume = progress::resume_state(&driver, &schema()).unwrap();
        assert_eq!(resume.get("users"), Some(&1));
    }
}
