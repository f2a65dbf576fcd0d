//! Conflict-resolving application of a single mutation batch.
//!
//! A batch applies all-or-nothing: the first mutation that loses its
//! conflict check rejects the whole batch, and the caller rolls the
//! transaction back. Conflict checks compare the batch's logical time
//! (the millisecond timestamp in its id) against the row write ledger.
//!
//! Resolution rules:
//! - insert wins only if the row does not currently exist
//! - update requires the row to exist; a deleted row stays deleted
//! - update against a newer ledger entry still merges, but drops the
//!   patch's null entries so it cannot clear columns a newer write set
//! - delete against a newer ledger entry is rejected as stale

use crate::error::ServerError;
use crate::ledger::{self, LedgerEntry};
use relaydb_codec::{row_id, RowPatch};
use relaydb_protocol::{Mutation, MutationBatch, MutationKind, MutationOp};
use relaydb_storage::{StorageError, StorageTxn};

/// Why a batch could not be applied.
#[derive(Debug)]
pub(crate) enum ApplyError {
    /// Conflict resolution rejected the batch; the reason is final and
    /// reported to the client verbatim.
    Reject(String),
    /// The server itself faulted.
    Fault(ServerError),
}

impl From<ServerError> for ApplyError {
    fn from(err: ServerError) -> Self {
        ApplyError::Fault(err)
    }
}

impl From<StorageError> for ApplyError {
    fn from(err: StorageError) -> Self {
        ApplyError::Fault(ServerError::Storage(err))
    }
}

fn reject(reason: impl Into<String>) -> ApplyError {
    ApplyError::Reject(reason.into())
}

/// Applies every mutation of `batch` through `txn`, stamping ledger
/// entries with `commit_ms`.
///
/// Returns the mutations as actually applied: a stale update comes back
/// with its null entries stripped. The caller persists these effective
/// mutations to the oplog, so that the catch-up feed replays the server's
/// resolution rather than the submitted patch.
///
/// On `Reject` the caller must roll the transaction back; partial writes
/// from earlier mutations of the batch must not survive.
pub(crate) fn apply_batch(
    txn: &mut dyn StorageTxn,
    batch: &MutationBatch,
    commit_ms: i64,
) -> Result<Vec<Mutation>, ApplyError> {
    let logical_ms = batch.logical_time_ms();
    let mut effective = Vec::with_capacity(batch.mutations.len());
    for mutation in &batch.mutations {
        let op = apply_mutation(txn, &mutation.table, &mutation.op, logical_ms, commit_ms)?;
        effective.push(Mutation {
            table: mutation.table.clone(),
            op,
            undo: mutation.undo.clone(),
        });
    }
    Ok(effective)
}

fn apply_mutation(
    txn: &mut dyn StorageTxn,
    table: &str,
    op: &MutationOp,
    logical_ms: i64,
    commit_ms: i64,
) -> Result<MutationOp, ApplyError> {
    match op {
        MutationOp::Insert { rows } => {
            for row in rows {
                let id = row_id(row)
                    .map(str::to_string)
                    .ok_or_else(|| reject(format!("insert into '{table}' carries a row without an id")))?;
                if txn.get(table, &id)?.is_some() {
                    return Err(reject(format!("row '{id}' already exists in '{table}'")));
                }
                txn.upsert(table, row.clone())?;
                stamp(txn, table, &id, MutationKind::Insert, commit_ms)?;
            }
            Ok(op.clone())
        }
        MutationOp::Update { id, patch } => {
            if txn.get(table, id)?.is_none() {
                // A deleted row stays deleted; updates cannot resurrect it.
                return Err(reject(format!("row '{id}' in '{table}' is missing or deleted")));
            }
            let entry = ledger::lookup(txn, table, id)?;
            let effective = match entry {
                Some(e) if e.server_timestamp_ms > logical_ms => without_clears(patch),
                _ => patch.clone(),
            };
            if !effective.is_empty() {
                txn.update(table, id, &effective)?;
            }
            stamp(txn, table, id, MutationKind::Update, commit_ms)?;
            Ok(MutationOp::Update {
                id: id.clone(),
                patch: effective,
            })
        }
        MutationOp::Delete { ids } => {
            for id in ids {
                if let Some(e) = ledger::lookup(txn, table, id)? {
                    if e.server_timestamp_ms > logical_ms {
                        return Err(reject(format!(
                            "stale delete of row '{id}' in '{table}'"
                        )));
                    }
                }
                if txn.delete(table, id)?.is_none() {
                    return Err(reject(format!(
                        "row '{id}' in '{table}' is already deleted"
                    )));
                }
                stamp(txn, table, id, MutationKind::Delete, commit_ms)?;
            }
            Ok(op.clone())
        }
    }
}

fn stamp(
    txn: &mut dyn StorageTxn,
    table: &str,
    id: &str,
    op: MutationKind,
    commit_ms: i64,
) -> Result<(), ApplyError> {
    ledger::record(
        txn,
        table,
        id,
        LedgerEntry {
            server_timestamp_ms: commit_ms,
            op,
        },
    )?;
    Ok(())
}

/// A copy of the patch with null (column-clearing) entries removed.
///
/// Used when the ledger shows a newer write: the older patch may still
/// contribute the fields it carries, but must not clear anything.
fn without_clears(patch: &RowPatch) -> RowPatch {
    patch
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
