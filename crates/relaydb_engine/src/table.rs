//! Synced table handles: mutation capture with optimistic local apply.
//!
//! While the replica is synced, every write through a [`SyncedTable`]
//! commits three things in one transaction: the data change itself, the
//! captured mutation's undo information, and the queue row that will
//! carry the batch to the remote. The application sees its write
//! immediately; the queue drainer is nudged afterwards.
//!
//! Before the replica reaches the synced state, writes are still applied
//! locally but bypass the queue: the batch goes straight to the remote
//! through the direct-send channel, and the catch-up pass that closes the
//! bootstrap pulls its committed form back down.

use crate::error::{EngineError, EngineResult};
use crate::local;
use crate::policy::WritePolicy;
use crate::queue;
use crate::state::SyncState;
use relaydb_codec::{Row, RowPatch};
use relaydb_protocol::{Mutation, MutationBatch, MutationOp, NodeInfo};
use relaydb_storage::{StorageDriver, StorageTxn};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};
use tracing::debug;

/// Identity stamped on every batch a replica originates.
#[derive(Debug, Clone)]
pub(crate) struct Origin {
    pub(crate) db_name: String,
    pub(crate) node: NodeInfo,
}

/// A handle for reading and writing one synced table.
///
/// Cheap to clone; all clones share the replica's storage.
pub struct SyncedTable<D: StorageDriver> {
    name: String,
    driver: D,
    origin: Origin,
    drain: Arc<Notify>,
    policy: Arc<dyn WritePolicy>,
    state: watch::Receiver<SyncState>,
    direct: mpsc::UnboundedSender<MutationBatch>,
}

impl<D: StorageDriver + Clone> Clone for SyncedTable<D> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            driver: self.driver.clone(),
            origin: self.origin.clone(),
            drain: Arc::clone(&self.drain),
            policy: Arc::clone(&self.policy),
            state: self.state.clone(),
            direct: self.direct.clone(),
        }
    }
}

impl<D: StorageDriver> SyncedTable<D> {
    pub(crate) fn new(
        name: String,
        driver: D,
        origin: Origin,
        drain: Arc<Notify>,
        policy: Arc<dyn WritePolicy>,
        state: watch::Receiver<SyncState>,
        direct: mpsc::UnboundedSender<MutationBatch>,
    ) -> Self {
        Self {
            name,
            driver,
            origin,
            drain,
            policy,
            state,
            direct,
        }
    }

    /// The table's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts rows, capturing a batch for the remote.
    ///
    /// Every row must carry a string `"id"` column, and no id may exist
    /// in the table yet.
    pub fn insert(&self, rows: Vec<Row>) -> EngineResult<()> {
        self.capture(Mutation::insert(&self.name, rows))
    }

    /// Patches one row, capturing a batch carrying the prior values.
    ///
    /// Null values in the patch clear columns.
    pub fn update(&self, id: &str, patch: RowPatch) -> EngineResult<()> {
        let prior = self
            .driver
            .get(&self.name, id)?
            .ok_or_else(|| EngineError::RowNotFound {
                table: self.name.clone(),
                id: id.to_string(),
            })?;
        self.capture(Mutation::update(&self.name, id, patch, &prior))
    }

    /// Deletes rows by id, capturing their full prior state for undo.
    ///
    /// Ids with no local row are skipped; deleting nothing captures
    /// nothing.
    pub fn delete(&self, ids: &[&str]) -> EngineResult<()> {
        let mut prior = Vec::new();
        for id in ids {
            if let Some(row) = self.driver.get(&self.name, id)? {
                prior.push(row);
            }
        }
        if prior.is_empty() {
            return Ok(());
        }
        self.capture(Mutation::delete(&self.name, prior))
    }

    /// Fetches a row by id.
    pub fn get(&self, id: &str) -> EngineResult<Option<Row>> {
        Ok(self.driver.get(&self.name, id)?)
    }

    /// Returns up to `limit` rows starting at `offset`, in id order.
    pub fn select(&self, offset: u64, limit: usize) -> EngineResult<Vec<Row>> {
        Ok(self.driver.scan(&self.name, offset, limit)?)
    }

    /// The number of rows in the table.
    pub fn count(&self) -> EngineResult<u64> {
        Ok(self.driver.count(&self.name)?)
    }

    fn capture(&self, mutation: Mutation) -> EngineResult<()> {
        self.policy
            .check(&self.name, &mutation.op)
            .map_err(|reason| EngineError::PolicyDenied {
                table: self.name.clone(),
                reason,
            })?;
        let batch = MutationBatch::single(
            self.origin.db_name.clone(),
            self.origin.node.clone(),
            mutation,
        );
        if *self.state.borrow() == SyncState::Synced {
            self.apply_and_enqueue(&batch)?;
            debug!(table = %self.name, batch = %batch.id, "mutation captured");
            self.drain.notify_one();
        } else {
            // Pre-synced writes never enter the queue: they apply
            // locally and go straight to the remote; the catch-up pass
            // pulls their committed form back down.
            self.apply_strictly(&batch)?;
            debug!(table = %self.name, batch = %batch.id, "mutation sent directly while syncing");
            let _ = self.direct.send(batch);
        }
        Ok(())
    }

    /// Applies the batch strictly and enqueues it, in one transaction.
    ///
    /// Unlike replayed remote history, a local write must respect local
    /// constraints: a duplicate insert fails here, rolls everything back,
    /// and nothing is enqueued.
    fn apply_and_enqueue(&self, batch: &MutationBatch) -> EngineResult<()> {
        local::with_txn(&self.driver, |txn: &mut dyn StorageTxn| {
            for mutation in &batch.mutations {
                apply_strict(txn, &mutation.table, &mutation.op)?;
            }
            queue::enqueue(txn, batch)
        })
    }

    /// Applies the batch strictly without queueing it.
    fn apply_strictly(&self, batch: &MutationBatch) -> EngineResult<()> {
        local::with_txn(&self.driver, |txn: &mut dyn StorageTxn| {
            for mutation in &batch.mutations {
                apply_strict(txn, &mutation.table, &mutation.op)?;
            }
            Ok(())
        })
    }
}

fn apply_strict(txn: &mut dyn StorageTxn, table: &str, op: &MutationOp) -> EngineResult<()> {
    match op {
        MutationOp::Insert { rows } => {
            for row in rows {
                txn.insert(table, row.clone())?;
            }
        }
        MutationOp::Update { id, patch } => {
            txn.update(table, id, patch)?;
        }
        MutationOp::Delete { ids } => {
            for id in ids {
                txn.delete(table, id)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{MutationQueue, QUEUE_TABLE};
    use relaydb_protocol::MutationOp;
    use relaydb_storage::MemoryDriver;
    use serde_json::json;

    fn table_at(
        driver: &MemoryDriver,
        policy: Arc<dyn WritePolicy>,
        state: SyncState,
    ) -> (
        SyncedTable<MemoryDriver>,
        mpsc::UnboundedReceiver<MutationBatch>,
    ) {
        let (_state_tx, state_rx) = watch::channel(state);
        let (direct_tx, direct_rx) = mpsc::unbounded_channel();
        let table = SyncedTable::new(
            "users".into(),
            driver.clone(),
            Origin {
                db_name: "app".into(),
                node: NodeInfo::generate("test"),
            },
            Arc::new(Notify::new()),
            policy,
            state_rx,
            direct_tx,
        );
        (table, direct_rx)
    }

    fn table_with_policy(
        driver: &MemoryDriver,
        policy: Arc<dyn WritePolicy>,
    ) -> SyncedTable<MemoryDriver> {
        table_at(driver, policy, SyncState::Synced).0
    }

    fn table(driver: &MemoryDriver) -> SyncedTable<MemoryDriver> {
        table_with_policy(driver, Arc::new(crate::policy::AllowAll))
    }

    fn row(id: &str, pairs: &[(&str, serde_json::Value)]) -> Row {
        let mut r = Row::new();
        r.insert("id".into(), json!(id));
        for (k, v) in pairs {
            r.insert(k.to_string(), v.clone());
        }
        r
    }

    #[test]
    fn insert_applies_locally_and_enqueues() {
        let driver = MemoryDriver::new();
        driver.ensure_table(QUEUE_TABLE).unwrap();
        let users = table(&driver);

        users.insert(vec![row("a", &[("name", json!("x"))])]).unwrap();

        assert_eq!(
            users.get("a").unwrap().unwrap().get("name"),
            Some(&json!("x"))
        );
        let queue = MutationQueue::open(driver).unwrap();
        let pending = queue.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].mutations[0].table, "users");
    }

    #[test]
    fn insert_without_id_is_refused() {
        let driver = MemoryDriver::new();
        let users = table(&driver);
        let mut bad = Row::new();
        bad.insert("name".into(), json!("x"));
        assert!(users.insert(vec![bad]).is_err());
        assert_eq!(driver.count(QUEUE_TABLE).unwrap(), 0);
    }

    #[test]
    fn update_captures_prior_values() {
        let driver = MemoryDriver::new();
        driver.ensure_table(QUEUE_TABLE).unwrap();
        let users = table(&driver);
        users.insert(vec![row("a", &[("name", json!("old"))])]).unwrap();

        users
            .update("a", RowPatch::from([("name".to_string(), json!("new"))]))
            .unwrap();
        assert_eq!(
            users.get("a").unwrap().unwrap().get("name"),
            Some(&json!("new"))
        );

        let queue = MutationQueue::open(driver).unwrap();
        let pending = queue.pending().unwrap();
        let MutationOp::Update { patch, .. } = &pending[1].mutations[0].undo else {
            panic!("expected update undo");
        };
        assert_eq!(patch.get("name"), Some(&json!("old")));
    }

    #[test]
    fn update_of_missing_row_fails() {
        let driver = MemoryDriver::new();
        let users = table(&driver);
        let err = users
            .update("ghost", RowPatch::from([("n".to_string(), json!(1))]))
            .unwrap_err();
        assert!(matches!(err, EngineError::RowNotFound { .. }));
    }

    #[test]
    fn delete_skips_missing_ids() {
        let driver = MemoryDriver::new();
        driver.ensure_table(QUEUE_TABLE).unwrap();
        let users = table(&driver);
        users.insert(vec![row("a", &[])]).unwrap();

        users.delete(&["a", "ghost"]).unwrap();
        assert_eq!(users.get("a").unwrap(), None);

        let queue = MutationQueue::open(driver).unwrap();
        let pending = queue.pending().unwrap();
        let MutationOp::Delete { ids } = &pending[1].mutations[0].op else {
            panic!("expected delete");
        };
        assert_eq!(ids, &vec!["a".to_string()]);
    }

    #[test]
    fn duplicate_insert_fails_and_enqueues_nothing() {
        let driver = MemoryDriver::new();
        driver.ensure_table(QUEUE_TABLE).unwrap();
        let users = table(&driver);
        users.insert(vec![row("a", &[])]).unwrap();

        let err = users.insert(vec![row("a", &[])]).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Storage(relaydb_storage::StorageError::DuplicateId { .. })
        ));
        assert_eq!(driver.count(QUEUE_TABLE).unwrap(), 1);
    }

    #[test]
    fn denied_write_applies_nothing() {
        struct ReadOnly;
        impl WritePolicy for ReadOnly {
            fn check(&self, _table: &str, _op: &MutationOp) -> Result<(), String> {
                Err("read-only session".into())
            }
        }

        let driver = MemoryDriver::new();
        driver.ensure_table(QUEUE_TABLE).unwrap();
        let users = table_with_policy(&driver, Arc::new(ReadOnly));

        let err = users.insert(vec![row("a", &[])]).unwrap_err();
        assert!(matches!(err, EngineError::PolicyDenied { .. }));
        assert_eq!(users.get("a").unwrap(), None);
        assert_eq!(driver.count(QUEUE_TABLE).unwrap(), 0);
    }

    #[test]
    fn writes_before_synced_skip_the_queue() {
        let driver = MemoryDriver::new();
        driver.ensure_table(QUEUE_TABLE).unwrap();
        let (users, mut direct) = table_at(
            &driver,
            Arc::new(crate::policy::AllowAll),
            SyncState::Pulling,
        );

        users.insert(vec![row("a", &[])]).unwrap();

        // Applied locally, handed to the direct sender, never queued.
        assert!(users.get("a").unwrap().is_some());
        assert_eq!(driver.count(QUEUE_TABLE).unwrap(), 0);
        let batch = direct.try_recv().unwrap();
        assert_eq!(batch.mutations[0].table, "users");
        assert!(direct.try_recv().is_err());
    }

    #[test]
    fn delete_of_nothing_captures_nothing() {
        let driver = MemoryDriver::new();
        driver.ensure_table(QUEUE_TABLE).unwrap();
        let users = table(&driver);
        users.delete(&["ghost"]).unwrap();
        assert_eq!(driver.count(QUEUE_TABLE).unwrap(), 0);
    }
}
