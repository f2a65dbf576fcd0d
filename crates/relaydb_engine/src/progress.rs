//! Durable pull progress and the last replayed commit time.
//!
//! `_pull_progress` holds one row per synced table: the number of rows
//! safely committed locally, or the string `"all"` once the table's
//! snapshot is complete. A reserved row tracks the newest commit
//! timestamp the catch-up feed has replayed. Progress rows advance in the
//! same transaction as the data they describe, so an interrupted pull
//! resumes exactly where it stopped.

use crate::error::{EngineError, EngineResult};
use relaydb_codec::Row;
use relaydb_protocol::PullResume;
use relaydb_storage::{StorageDriver, StorageTxn};
use serde_json::json;

/// Reserved table holding per-table pull progress.
pub const PROGRESS_TABLE: &str = "_pull_progress";

/// Reserved row id holding the last replayed commit timestamp.
///
/// The `#` prefix keeps it out of the table-name id space.
pub(crate) const LAST_TS_ROW: &str = "#last_server_timestamp";

const COMPLETE: &str = "all";

fn corrupt(detail: impl Into<String>) -> EngineError {
    EngineError::CorruptRow {
        table: PROGRESS_TABLE.into(),
        detail: detail.into(),
    }
}

fn progress_row(id: &str, state: serde_json::Value) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), json!(id));
    row.insert("state".into(), state);
    row
}

/// Builds the resume state for the next pull attempt.
///
/// Tables with no progress row start at offset zero; completed tables are
/// omitted. An empty map means the snapshot is complete.
pub(crate) fn resume_state<D: StorageDriver>(
    driver: &D,
    schema: &[String],
) -> EngineResult<PullResume> {
    let mut resume = PullResume::new();
    for table in schema {
        match driver.get(PROGRESS_TABLE, table)? {
            None => {
                resume.insert(table.clone(), 0);
            }
            Some(row) => match row.get("state") {
                Some(v) if v.as_str() == Some(COMPLETE) => {}
                Some(v) => {
                    let offset = v
                        .as_u64()
                        .ok_or_else(|| corrupt(format!("bad state for table '{table}'")))?;
                    resume.insert(table.clone(), offset);
                }
                None => return Err(corrupt(format!("missing state for table '{table}'"))),
            },
        }
    }
    Ok(resume)
}

/// Records that `count` more rows of `table` are committed locally.
pub(crate) fn advance(txn: &mut dyn StorageTxn, table: &str, count: u64) -> EngineResult<()> {
    let prior = match txn.get(PROGRESS_TABLE, table)? {
        Some(row) => row.get("state").and_then(|v| v.as_u64()).unwrap_or(0),
        None => 0,
    };
    txn.upsert(PROGRESS_TABLE, progress_row(table, json!(prior + count)))?;
    Ok(())
}

/// Marks a table's snapshot as complete.
pub(crate) fn mark_complete(txn: &mut dyn StorageTxn, table: &str) -> EngineResult<()> {
    txn.upsert(PROGRESS_TABLE, progress_row(table, json!(COMPLETE)))?;
    Ok(())
}

/// Records the baseline commit timestamp of a bulk-pull snapshot.
///
/// First writer wins: a resumed pull may carry a newer header, but rows
/// landed by the first attempt are only as fresh as its snapshot, so
/// catch-up must start from the oldest baseline seen.
pub(crate) fn set_snapshot_baseline<D: StorageDriver>(
    driver: &D,
    timestamp_ms: i64,
) -> EngineResult<()> {
    if last_server_timestamp(driver)? == 0 {
        crate::local::with_txn(driver, |txn| set_last_server_timestamp(txn, timestamp_ms))?;
    }
    Ok(())
}

/// The newest commit timestamp the catch-up feed has replayed.
pub(crate) fn last_server_timestamp<D: StorageDriver>(driver: &D) -> EngineResult<i64> {
    match driver.get(PROGRESS_TABLE, LAST_TS_ROW)? {
        Some(row) => row
            .get("state")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| corrupt("bad last timestamp")),
        None => Ok(0),
    }
}

/// Advances the last replayed commit timestamp.
pub(crate) fn set_last_server_timestamp(
    txn: &mut dyn StorageTxn,
    timestamp_ms: i64,
) -> EngineResult<()> {
    txn.upsert(
        PROGRESS_TABLE,
        progress_row(LAST_TS_ROW, json!(timestamp_ms)),
    )?;
    Ok(())
}
