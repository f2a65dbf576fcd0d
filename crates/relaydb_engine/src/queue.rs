//! Durable send queue and the dead-letter store.
//!
//! Every locally captured batch lands in `_mutation_queue` in the same
//! transaction as its optimistic write, so a crash can never lose a write
//! the application saw succeed. Queue rows record the remote's answer:
//!
//! - confirmed rows keep their commit timestamp as a durable record of
//!   the remote's decision; they stay in the queue
//! - rejected rows are undone against the data tables and moved to
//!   `_dead_letters` for the application to inspect; that purge is the
//!   only way a row ever leaves the queue
//!
//! Batch ids are time-sortable, so ascending row-id order in the queue is
//! capture order.

use crate::error::{EngineError, EngineResult};
use crate::local;
use relaydb_codec::{Row, RowPatch};
use relaydb_protocol::{BatchId, MutationBatch};
use relaydb_storage::{StorageDriver, StorageTxn};
use serde_json::json;
use tracing::{debug, warn};

/// Reserved table holding captured batches awaiting or past confirmation.
pub const QUEUE_TABLE: &str = "_mutation_queue";

/// Reserved table holding rejected batches and their rejection reasons.
pub const DEAD_LETTER_TABLE: &str = "_dead_letters";

const SCAN_CHUNK: usize = 256;

/// A rejected batch preserved for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    /// The batch as originally captured.
    pub batch: MutationBatch,
    /// The remote's rejection reason.
    pub reason: String,
}

fn corrupt(table: &str, detail: impl Into<String>) -> EngineError {
    EngineError::CorruptRow {
        table: table.into(),
        detail: detail.into(),
    }
}

fn batch_from_row(table: &str, row: &Row) -> EngineResult<MutationBatch> {
    let text = row
        .get("serialized_batch")
        .and_then(|v| v.as_str())
        .ok_or_else(|| corrupt(table, "missing serialized_batch"))?;
    Ok(MutationBatch::from_json(text)?)
}

/// Appends a batch to the queue, unconfirmed.
///
/// Runs inside the caller's transaction so the enqueue commits atomically
/// with the batch's optimistic application.
pub(crate) fn enqueue(txn: &mut dyn StorageTxn, batch: &MutationBatch) -> EngineResult<()> {
    let mut row = Row::new();
    row.insert("id".into(), json!(batch.id.to_string()));
    row.insert("serialized_batch".into(), json!(batch.to_json()?));
    row.insert("server_timestamp_ms".into(), json!(0));
    txn.insert(QUEUE_TABLE, row)?;
    Ok(())
}

fn letter_row(batch: &MutationBatch, reason: &str) -> EngineResult<Row> {
    let mut letter = Row::new();
    letter.insert("id".into(), json!(batch.id.to_string()));
    letter.insert("serialized_batch".into(), json!(batch.to_json()?));
    letter.insert("reason".into(), json!(reason));
    Ok(letter)
}

/// Undoes a batch that never entered the queue and records a dead letter.
///
/// The direct send path taken while the replica is still syncing applies
/// writes locally without queueing them; a rejection from the remote is
/// resolved here instead of through [`MutationQueue::reject`].
pub(crate) fn dead_letter<D: StorageDriver>(
    driver: &D,
    batch: &MutationBatch,
    reason: &str,
) -> EngineResult<()> {
    warn!(batch = %batch.id, %reason, "batch rejected, undoing local writes");
    local::with_txn(driver, |txn| {
        local::apply_undo(txn, &batch.mutations)?;
        txn.upsert(DEAD_LETTER_TABLE, letter_row(batch, reason)?)?;
        Ok(())
    })
}

/// Handle over the queue tables of one replica.
pub struct MutationQueue<D: StorageDriver> {
    driver: D,
}

impl<D: StorageDriver> MutationQueue<D> {
    /// Opens the queue over `driver`, creating its tables if needed.
    pub fn open(driver: D) -> EngineResult<Self> {
        driver.ensure_table(QUEUE_TABLE)?;
        driver.ensure_table(DEAD_LETTER_TABLE)?;
        Ok(Self { driver })
    }

    /// Returns all unconfirmed batches in capture order.
    pub fn pending(&self) -> EngineResult<Vec<MutationBatch>> {
        let mut out = Vec::new();
        let mut offset = 0u64;
        loop {
            let rows = self.driver.scan(QUEUE_TABLE, offset, SCAN_CHUNK)?;
            let exhausted = rows.len() < SCAN_CHUNK;
            for row in &rows {
                let confirmed = row
                    .get("server_timestamp_ms")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0)
                    != 0;
                if !confirmed {
                    out.push(batch_from_row(QUEUE_TABLE, row)?);
                }
            }
            if exhausted {
                return Ok(out);
            }
            offset += SCAN_CHUNK as u64;
        }
    }

    /// Marks a batch as confirmed at the given commit timestamp.
    pub fn confirm(&self, id: BatchId, server_timestamp_ms: i64) -> EngineResult<()> {
        let patch = RowPatch::from([(
            "server_timestamp_ms".to_string(),
            json!(server_timestamp_ms),
        )]);
        self.driver.update(QUEUE_TABLE, &id.to_string(), &patch)?;
        debug!(batch = %id, server_timestamp_ms, "batch confirmed");
        Ok(())
    }

    /// Resolves a batch the remote reported as already applied.
    ///
    /// The original confirmation was lost, so the authoritative commit
    /// time is unknown; the row is marked confirmed with a negative
    /// sentinel timestamp and stays in the queue like any confirmation.
    pub fn confirm_duplicate(&self, id: BatchId) -> EngineResult<()> {
        let patch = RowPatch::from([("server_timestamp_ms".to_string(), json!(-1))]);
        self.driver.update(QUEUE_TABLE, &id.to_string(), &patch)?;
        debug!(batch = %id, "batch was already applied remotely");
        Ok(())
    }

    /// Resolves a rejected batch: undoes its mutations against the data
    /// tables, drops the queue row, and records a dead letter.
    ///
    /// All three happen in one transaction. A batch already confirmed or
    /// never queued was resolved elsewhere; the call is then a no-op.
    pub fn reject(&self, id: BatchId, reason: &str) -> EngineResult<()> {
        warn!(batch = %id, %reason, "batch rejected, undoing local writes");
        local::with_txn(&self.driver, |txn| {
            let Some(row) = txn.get(QUEUE_TABLE, &id.to_string())? else {
                return Ok(());
            };
            let confirmed = row
                .get("server_timestamp_ms")
                .and_then(|v| v.as_i64())
                .unwrap_or(0)
                != 0;
            if confirmed {
                return Ok(());
            }
            txn.delete(QUEUE_TABLE, &id.to_string())?;
            let batch = batch_from_row(QUEUE_TABLE, &row)?;
            local::apply_undo(txn, &batch.mutations)?;
            txn.upsert(DEAD_LETTER_TABLE, letter_row(&batch, reason)?)?;
            Ok(())
        })
    }

    /// Returns every dead letter, oldest first.
    pub fn dead_letters(&self) -> EngineResult<Vec<DeadLetter>> {
        let mut out = Vec::new();
        let mut offset = 0u64;
        loop {
            let rows = self.driver.scan(DEAD_LETTER_TABLE, offset, SCAN_CHUNK)?;
            let exhausted = rows.len() < SCAN_CHUNK;
            for row in &rows {
                let reason = row
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| corrupt(DEAD_LETTER_TABLE, "missing reason"))?
                    .to_string();
                out.push(DeadLetter {
                    batch: batch_from_row(DEAD_LETTER_TABLE, row)?,
                    reason,
                });
            }
            if exhausted {
                return Ok(out);
            }
            offset += SCAN_CHUNK as u64;
        }
    }
}
