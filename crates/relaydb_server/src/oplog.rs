//! Committed-batch bookkeeping.
//!
//! Two reserved tables back idempotent resubmission and the catch-up feed:
//!
//! - `_applied_batches` records the resolution of every batch id the
//!   server has ever seen, so a resubmitted batch is answered with the
//!   same outcome without re-running conflict resolution.
//! - `_server_oplog` stores each applied batch keyed by its zero-padded
//!   commit time, so a plain id-ordered scan replays commits in order.
//!   Batches land here in their post-resolution form, so replaying the
//!   feed reproduces exactly the rows the server holds.

use crate::error::{ServerError, ServerResult};
use relaydb_codec::Row;
use relaydb_protocol::{BatchId, CommittedBatch, MutationBatch};
use relaydb_storage::{StorageDriver, StorageTxn};
use serde_json::json;

/// Reserved table recording the resolution of every batch id ever seen.
pub const APPLIED_BATCHES_TABLE: &str = "_applied_batches";

/// Reserved table holding applied batches in commit order.
pub const OPLOG_TABLE: &str = "_server_oplog";

const SCAN_CHUNK: usize = 256;

/// How a previously seen batch was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// The batch was applied at this commit time.
    Applied {
        /// Authoritative commit time.
        server_timestamp_ms: i64,
    },
    /// The batch was rejected with finality.
    Rejected {
        /// The rejection reason as originally reported.
        reason: String,
    },
}

fn oplog_key(server_timestamp_ms: i64, id: BatchId) -> String {
    // Zero-padding keeps lexicographic id order equal to commit order.
    format!("{server_timestamp_ms:020}/{id}")
}

/// Looks up how a batch id was resolved, if it was ever seen.
pub(crate) fn resolution(txn: &dyn StorageTxn, id: BatchId) -> ServerResult<Option<Resolution>> {
    let Some(row) = txn.get(APPLIED_BATCHES_TABLE, &id.to_string())? else {
        return Ok(None);
    };
    let corrupt = |detail: &str| ServerError::CorruptRow {
        table: APPLIED_BATCHES_TABLE.into(),
        detail: detail.into(),
    };
    match row.get("status").and_then(|v| v.as_str()) {
        Some("applied") => {
            let server_timestamp_ms = row
                .get("server_timestamp_ms")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| corrupt("applied batch missing server_timestamp_ms"))?;
            Ok(Some(Resolution::Applied {
                server_timestamp_ms,
            }))
        }
        Some("rejected") => {
            let reason = row
                .get("reason")
                .and_then(|v| v.as_str())
                .ok_or_else(|| corrupt("rejected batch missing reason"))?;
            Ok(Some(Resolution::Rejected {
                reason: reason.to_string(),
            }))
        }
        _ => Err(corrupt("missing or unknown status")),
    }
}

/// Records a batch as rejected so a resubmission replays the rejection.
pub(crate) fn record_rejection(
    txn: &mut dyn StorageTxn,
    id: BatchId,
    reason: &str,
) -> ServerResult<()> {
    let mut row = Row::new();
    row.insert("id".into(), json!(id.to_string()));
    row.insert("status".into(), json!("rejected"));
    row.insert("reason".into(), json!(reason));
    txn.upsert(APPLIED_BATCHES_TABLE, row)?;
    Ok(())
}

/// Records an applied batch: marks it resolved and appends it to the oplog.
pub(crate) fn record_commit(
    txn: &mut dyn StorageTxn,
    batch: &MutationBatch,
    server_timestamp_ms: i64,
) -> ServerResult<()> {
    let mut marker = Row::new();
    marker.insert("id".into(), json!(batch.id.to_string()));
    marker.insert("status".into(), json!("applied"));
    marker.insert("server_timestamp_ms".into(), json!(server_timestamp_ms));
    txn.upsert(APPLIED_BATCHES_TABLE, marker)?;

    let mut row = Row::new();
    row.insert("id".into(), json!(oplog_key(server_timestamp_ms, batch.id)));
    row.insert("serialized_batch".into(), json!(batch.to_json()?));
    row.insert("server_timestamp_ms".into(), json!(server_timestamp_ms));
    txn.upsert(OPLOG_TABLE, row)?;
    Ok(())
}

fn committed_from_row(row: &Row) -> ServerResult<CommittedBatch> {
    let corrupt = |detail: &str| ServerError::CorruptRow {
        table: OPLOG_TABLE.into(),
        detail: detail.into(),
    };
    let text = row
        .get("serialized_batch")
        .and_then(|v| v.as_str())
        .ok_or_else(|| corrupt("missing serialized_batch"))?;
    let server_timestamp_ms = row
        .get("server_timestamp_ms")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| corrupt("missing server_timestamp_ms"))?;
    Ok(CommittedBatch {
        batch: MutationBatch::from_json(text)?,
        server_timestamp_ms,
    })
}

/// Returns every batch committed strictly after `since_ms`, oldest first.
pub(crate) fn committed_since<D: StorageDriver>(
    driver: &D,
    since_ms: i64,
) -> ServerResult<Vec<CommittedBatch>> {
    let mut out = Vec::new();
    let mut offset = 0u64;
    loop {
        let rows = driver.scan(OPLOG_TABLE, offset, SCAN_CHUNK)?;
        let exhausted = rows.len() < SCAN_CHUNK;
        for row in &rows {
            let committed = committed_from_row(row)?;
            if committed.server_timestamp_ms > since_ms {
                out.push(committed);
            }
        }
        if exhausted {
            return Ok(out);
        }
        offset += SCAN_CHUNK as u64;
    }
}
