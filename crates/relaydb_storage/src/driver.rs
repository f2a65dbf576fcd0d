//! Storage driver trait definitions.

use crate::error::StorageResult;
use relaydb_codec::{Row, RowPatch};

/// The relational storage contract consumed by the sync subsystem.
///
/// Drivers expose named tables of JSON rows keyed by a string `"id"`
/// column. The sync layer owns no schema knowledge beyond this contract.
///
/// # Invariants
///
/// - `insert` fails on a duplicate id and never partially writes
/// - `scan` iterates in stable ascending id order
/// - writes to a table that was never mentioned before create it;
///   reads from an unknown table behave as reads from an empty table
/// - `transaction` is all-or-nothing: either every operation performed
///   through the [`StorageTxn`] commits, or none does; operations inside
///   a transaction observe the transaction's own earlier writes
pub trait StorageDriver: Send + Sync + 'static {
    /// Ensures a table exists, creating it empty if needed.
    fn ensure_table(&self, table: &str) -> StorageResult<()>;

    /// Inserts a new row, returning it as stored.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::StorageError::DuplicateId`] if the id exists,
    /// or [`crate::StorageError::MissingId`] if the row has no string id.
    fn insert(&self, table: &str, row: Row) -> StorageResult<Row>;

    /// Inserts or replaces a row by id.
    fn upsert(&self, table: &str, row: Row) -> StorageResult<Row>;

    /// Applies a patch to the row with the given id.
    ///
    /// Returns the updated row, or `None` if no such row exists.
    fn update(&self, table: &str, id: &str, patch: &RowPatch) -> StorageResult<Option<Row>>;

    /// Deletes the row with the given id, returning it if it existed.
    fn delete(&self, table: &str, id: &str) -> StorageResult<Option<Row>>;

    /// Fetches a row by id.
    fn get(&self, table: &str, id: &str) -> StorageResult<Option<Row>>;

    /// Returns up to `limit` rows starting at `offset`, in id order.
    fn scan(&self, table: &str, offset: u64, limit: usize) -> StorageResult<Vec<Row>>;

    /// Returns the number of rows in a table.
    fn count(&self, table: &str) -> StorageResult<u64>;

    /// Runs `f` inside an all-or-nothing transaction.
    ///
    /// If `f` returns an error the transaction rolls back and the error is
    /// propagated; otherwise every write performed through the
    /// [`StorageTxn`] commits atomically.
    fn transaction<F>(&self, f: F) -> StorageResult<()>
    where
        F: FnOnce(&mut dyn StorageTxn) -> StorageResult<()>,
        Self: Sized;
}

/// Mutating handle passed to [`StorageDriver::transaction`] closures.
///
/// Mirrors the driver's write surface; reads observe the transaction's
/// own uncommitted writes.
pub trait StorageTxn {
    /// Inserts a new row; fails on duplicate id.
    fn insert(&mut self, table: &str, row: Row) -> StorageResult<Row>;

    /// Inserts or replaces a row by id.
    fn upsert(&mut self, table: &str, row: Row) -> StorageResult<Row>;

    /// Applies a patch to a row; `None` if the row is missing.
    fn update(&mut self, table: &str, id: &str, patch: &RowPatch) -> StorageResult<Option<Row>>;

    /// Deletes a row, returning it if it existed.
    fn delete(&mut self, table: &str, id: &str) -> StorageResult<Option<Row>>;

    /// Fetches a row by id.
    fn get(&self, table: &str, id: &str) -> StorageResult<Option<Row>>;
}
