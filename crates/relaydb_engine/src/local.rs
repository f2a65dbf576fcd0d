//! Convergent application of mutation operations to local tables.
//!
//! Unlike the server, the local side never rejects: it nudges the store
//! towards the operation's outcome and ignores whatever no longer applies.
//! Applying the same operation twice, or applying a batch this replica
//! itself originated and already holds, leaves the store unchanged. That
//! makes the catch-up feed, optimistic local writes, and rejection undo
//! all safe to replay in any interleaving.

use crate::error::{EngineError, EngineResult};
use relaydb_codec::{merge_patch, row_id};
use relaydb_protocol::{Mutation, MutationOp};
use relaydb_storage::{StorageDriver, StorageError, StorageTxn};

/// Runs `f` in a driver transaction, carrying engine errors out intact.
///
/// A non-storage error rolls the transaction back via a sentinel storage
/// error and is returned as-is.
pub(crate) fn with_txn<D, F>(driver: &D, f: F) -> EngineResult<()>
where
    D: StorageDriver,
    F: FnOnce(&mut dyn StorageTxn) -> EngineResult<()>,
{
    let mut carried: Option<EngineError> = None;
    let result = driver.transaction(|txn| {
        f(txn).map_err(|e| match e {
            EngineError::Storage(s) => s,
            other => {
                carried = Some(other);
                StorageError::Backend("engine fault".into())
            }
        })
    });
    match carried {
        Some(e) => Err(e),
        None => result.map_err(EngineError::from),
    }
}

/// Applies one operation convergently through `txn`.
pub(crate) fn apply_op(txn: &mut dyn StorageTxn, table: &str, op: &MutationOp) -> EngineResult<()> {
    match op {
        MutationOp::Insert { rows } => {
            for row in rows {
                if row_id(row).is_some() {
                    txn.upsert(table, row.clone())?;
                }
            }
        }
        MutationOp::Update { id, patch } => {
            if let Some(mut row) = txn.get(table, id)? {
                merge_patch(&mut row, patch);
                txn.upsert(table, row)?;
            }
            // A missing row was deleted by a later write; leave it gone.
        }
        MutationOp::Delete { ids } => {
            for id in ids {
                txn.delete(table, id)?;
            }
        }
    }
    Ok(())
}

/// Applies a batch's mutations in order.
pub(crate) fn apply_mutations(
    txn: &mut dyn StorageTxn,
    mutations: &[Mutation],
) -> EngineResult<()> {
    for mutation in mutations {
        apply_op(txn, &mutation.table, &mutation.op)?;
    }
    Ok(())
}

/// Applies the inverses of a batch's mutations, newest first.
pub(crate) fn apply_undo(txn: &mut dyn StorageTxn, mutations: &[Mutation]) -> EngineResult<()> {
    for mutation in mutations.iter().rev() {
        apply_op(txn, &mutation.table, &mutation.undo)?;
    }
    Ok(())
}
