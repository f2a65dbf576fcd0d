//! In-memory reference driver.

use crate::driver::{StorageDriver, StorageTxn};
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use relaydb_codec::{merge_patch, row_id, Row, RowPatch};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

type Table = BTreeMap<String, Row>;
type Store = HashMap<String, Table>;

/// An in-memory storage driver.
///
/// Tables are `BTreeMap`s keyed by row id, which gives `scan` its stable
/// id order for free. Transactions run against a snapshot of the whole
/// store that replaces it on commit; the store lock is held for the
/// duration, which is fine for the cooperative single-writer model the
/// sync layer assumes.
///
/// Cloning the driver is cheap and shares the underlying store.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    store: Arc<Mutex<Store>>,
}

impl MemoryDriver {
    /// Creates an empty driver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all rows of a table, in id order. Test helper.
    pub fn dump(&self, table: &str) -> Vec<Row> {
        self.store
            .lock()
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }
}

fn require_id(table: &str, row: &Row) -> StorageResult<String> {
    row_id(row)
        .map(str::to_string)
        .ok_or_else(|| StorageError::MissingId {
            table: table.to_string(),
        })
}

fn store_insert(store: &mut Store, table: &str, row: Row) -> StorageResult<Row> {
    let id = require_id(table, &row)?;
    let entries = store.entry(table.to_string()).or_default();
    if entries.contains_key(&id) {
        return Err(StorageError::DuplicateId {
            table: table.to_string(),
            id,
        });
    }
    entries.insert(id, row.clone());
    Ok(row)
}

fn store_upsert(store: &mut Store, table: &str, row: Row) -> StorageResult<Row> {
    let id = require_id(table, &row)?;
    store.entry(table.to_string()).or_default().insert(id, row.clone());
    Ok(row)
}

fn store_update(
    store: &mut Store,
    table: &str,
    id: &str,
    patch: &RowPatch,
) -> StorageResult<Option<Row>> {
    let Some(row) = store.get_mut(table).and_then(|t| t.get_mut(id)) else {
        return Ok(None);
    };
    merge_patch(row, patch);
    Ok(Some(row.clone()))
}

fn store_delete(store: &mut Store, table: &str, id: &str) -> StorageResult<Option<Row>> {
    Ok(store.get_mut(table).and_then(|t| t.remove(id)))
}

fn store_get(store: &Store, table: &str, id: &str) -> StorageResult<Option<Row>> {
    Ok(store.get(table).and_then(|t| t.get(id).cloned()))
}

impl StorageDriver for MemoryDriver {
    fn ensure_table(&self, table: &str) -> StorageResult<()> {
        self.store.lock().entry(table.to_string()).or_default();
        Ok(())
    }

    fn insert(&self, table: &str, row: Row) -> StorageResult<Row> {
        store_insert(&mut self.store.lock(), table, row)
    }

    fn upsert(&self, table: &str, row: Row) -> StorageResult<Row> {
        store_upsert(&mut self.store.lock(), table, row)
    }

    fn update(&self, table: &str, id: &str, patch: &RowPatch) -> StorageResult<Option<Row>> {
        store_update(&mut self.store.lock(), table, id, patch)
    }

    fn delete(&self, table: &str, id: &str) -> StorageResult<Option<Row>> {
        store_delete(&mut self.store.lock(), table, id)
    }

    fn get(&self, table: &str, id: &str) -> StorageResult<Option<Row>> {
        store_get(&self.store.lock(), table, id)
    }

    fn scan(&self, table: &str, offset: u64, limit: usize) -> StorageResult<Vec<Row>> {
        Ok(self
            .store
            .lock()
            .get(table)
            .map(|t| {
                t.values()
                    .skip(offset as usize)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn count(&self, table: &str) -> StorageResult<u64> {
        Ok(self
            .store
            .lock()
            .get(table)
            .map(|t| t.len() as u64)
            .unwrap_or(0))
    }

    fn transaction<F>(&self, f: F) -> StorageResult<()>
    where
        F: FnOnce(&mut dyn StorageTxn) -> StorageResult<()>,
    {
        let mut store = self.store.lock();
        let mut txn = MemoryTxn {
            snapshot: store.clone(),
        };
        f(&mut txn)?;
        *store = txn.snapshot;
        Ok(())
    }
}

/// Transaction handle over a snapshot of the store.
struct MemoryTxn {
    snapshot: Store,
}

impl StorageTxn for MemoryTxn {
    fn insert(&mut self, table: &str, row: Row) -> StorageResult<Row> {
        store_insert(&mut self.snapshot, table, row)
    }

    fn upsert(&mut self, table: &str, row: Row) -> StorageResult<Row> {
        store_upsert(&mut self.snapshot, table, row)
    }

    fn update(&mut self, table: &str, id: &str, patch: &RowPatch) -> StorageResult<Option<Row>> {
        store_update(&mut self.snapshot, table, id, patch)
    }

    fn delete(&mut self, table: &str, id: &str) -> StorageResult<Option<Row>> {
        store_delete(&mut self.snapshot, table, id)
    }

    fn get(&self, table: &str, id: &str) -> StorageResult<Option<Row>> {
        store_get(&self.snapshot, table, id)
    }
}
