//! Per-row write ledger backing conflict decisions.
//!
//! Every row the server has ever written carries a ledger entry recording
//! the commit time and kind of the last write. Incoming mutations compare
//! their batch's logical time against this entry to decide whether they
//! are stale.

use crate::error::{ServerError, ServerResult};
use relaydb_codec::Row;
use relaydb_protocol::MutationKind;
use relaydb_storage::StorageTxn;
use serde_json::json;

/// Reserved table holding the per-row write ledger.
pub const LEDGER_TABLE: &str = "_latest_server_timestamp";

/// The last committed write against one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Commit time of the last write, in server milliseconds.
    pub server_timestamp_ms: i64,
    /// Kind of the last write.
    pub op: MutationKind,
}

fn ledger_key(table: &str, row_id: &str) -> String {
    format!("{table}/{row_id}")
}

fn corrupt(detail: impl Into<String>) -> ServerError {
    ServerError::CorruptRow {
        table: LEDGER_TABLE.into(),
        detail: detail.into(),
    }
}

fn entry_from_row(row: &Row) -> ServerResult<LedgerEntry> {
    let server_timestamp_ms = row
        .get("server_timestamp_ms")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| corrupt("missing server_timestamp_ms"))?;
    let op = row
        .get("op")
        .and_then(|v| v.as_str())
        .and_then(MutationKind::parse)
        .ok_or_else(|| corrupt("missing or unknown op"))?;
    Ok(LedgerEntry {
        server_timestamp_ms,
        op,
    })
}

/// Looks up the ledger entry for one row, if any write was ever committed.
pub fn lookup(
    txn: &dyn StorageTxn,
    table: &str,
    row_id: &str,
) -> ServerResult<Option<LedgerEntry>> {
    let row = txn.get(LEDGER_TABLE, &ledger_key(table, row_id))?;
    row.as_ref().map(entry_from_row).transpose()
}

/// Records a committed write in the ledger, replacing any prior entry.
pub fn record(
    txn: &mut dyn StorageTxn,
    table: &str,
    row_id: &str,
    entry: LedgerEntry,
) -> ServerResult<()> {
    let mut row = Row::new();
    row.insert("id".into(), json!(ledger_key(table, row_id)));
    row.insert(
        "server_timestamp_ms".into(),
        json!(entry.server_timestamp_ms),
    );
    row.insert("op".into(), json!(entry.op.as_str()));
    txn.upsert(LEDGER_TABLE, row)?;
    Ok(())
}
