//! The authoritative sync endpoint.

use crate::apply::{self, ApplyError};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::ledger::LEDGER_TABLE;
use crate::oplog::{self, Resolution, APPLIED_BATCHES_TABLE, OPLOG_TABLE};
use crate::pull::{self, PullStream};
use parking_lot::Mutex;
use relaydb_protocol::{
    BatchConfirmation, BatchRejection, CommittedBatch, MutationBatch, PullResume, SendOutcome,
};
use relaydb_storage::{StorageDriver, StorageError, StorageTxn};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// The authoritative remote endpoint of the sync subsystem.
///
/// Owns a storage driver holding the canonical copy of every synced table
/// plus the server's bookkeeping tables, and serves the three wire
/// operations: `send`, `get`, and `pull`.
///
/// Commit timestamps are strictly monotonic per server: each applied batch
/// gets a timestamp at least one millisecond past the previous one, even
/// if the wall clock stalls or steps backwards.
pub struct SyncServer<D: StorageDriver> {
    driver: D,
    config: ServerConfig,
    schema: Vec<String>,
    last_timestamp_ms: Mutex<i64>,
}

enum BatchDecision {
    Applied(i64),
    Duplicate,
    ReplayReject(String),
    FreshReject(String),
}

impl<D: StorageDriver> SyncServer<D> {
    /// Opens a server over `driver`, serving the tables named in `schema`.
    ///
    /// Creates the bookkeeping tables if they do not exist yet.
    pub fn open(driver: D, schema: Vec<String>, config: ServerConfig) -> ServerResult<Self> {
        for table in [LEDGER_TABLE, APPLIED_BATCHES_TABLE, OPLOG_TABLE] {
            driver.ensure_table(table)?;
        }
        for table in &schema {
            driver.ensure_table(table)?;
        }
        Ok(Self {
            driver,
            config,
            schema,
            last_timestamp_ms: Mutex::new(0),
        })
    }

    /// The tables this server syncs, in pull order.
    pub fn schema(&self) -> &[String] {
        &self.schema
    }

    /// The backing storage driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Applies a group of mutation batches with conflict resolution.
    ///
    /// Each batch is resolved independently and atomically: it either
    /// applies in full at one commit timestamp, or it is rejected with
    /// finality and leaves no trace in the synced tables. Batches seen
    /// before replay their original resolution without touching data.
    pub fn send(&self, batches: &[MutationBatch]) -> ServerResult<SendOutcome> {
        let mut outcome = SendOutcome::default();
        for batch in batches {
            match self.resolve_batch(batch)? {
                BatchDecision::Applied(server_timestamp_ms) => {
                    debug!(batch = %batch.id, server_timestamp_ms, "batch applied");
                    outcome.succeeded.push(BatchConfirmation {
                        id: batch.id,
                        server_timestamp_ms,
                    });
                }
                BatchDecision::Duplicate => {
                    debug!(batch = %batch.id, "batch already applied");
                    outcome.duplicated.push(batch.id);
                }
                BatchDecision::ReplayReject(reason) | BatchDecision::FreshReject(reason) => {
                    warn!(batch = %batch.id, %reason, "batch rejected");
                    outcome.failed.push(BatchRejection {
                        id: batch.id,
                        reason,
                    });
                }
            }
        }
        info!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            duplicated = outcome.duplicated.len(),
            "send resolved"
        );
        Ok(outcome)
    }

    /// Returns every batch committed strictly after `since_ms`, oldest
    /// first. This is the catch-up feed clients poll while synced.
    pub fn get(&self, since_ms: i64) -> ServerResult<Vec<CommittedBatch>> {
        oplog::committed_since(&self.driver, since_ms)
    }

    /// Produces the bulk-pull stream for the given resume state.
    ///
    /// The stream opens with a snapshot header carrying the last commit
    /// timestamp, so the consumer can base its catch-up feed on it. Chunks
    /// are scanned and encoded as the consumer iterates; the dataset is
    /// never materialized in full.
    pub fn pull(&self, resume: &PullResume) -> PullStream<'_, D> {
        let snapshot_ms = *self.last_timestamp_ms.lock();
        pull::stream(&self.driver, &self.config.pull, &self.schema, resume, snapshot_ms)
    }

    /// Resolves one batch in its own transaction.
    ///
    /// A fresh rejection rolls the data transaction back, then records the
    /// rejection marker in a second transaction so resubmissions replay it.
    fn resolve_batch(&self, batch: &MutationBatch) -> ServerResult<BatchDecision> {
        let commit_ms = self.next_timestamp_ms();
        let mut decision: Option<BatchDecision> = None;
        let mut fault: Option<ServerError> = None;

        let txn_result = self.driver.transaction(|txn| {
            match Self::decide(txn, batch, commit_ms) {
                Ok(d @ BatchDecision::FreshReject(_)) => {
                    decision = Some(d);
                    // Sentinel error: forces rollback of the partial apply.
                    Err(StorageError::Backend("batch rejected".into()))
                }
                Ok(d) => {
                    decision = Some(d);
                    Ok(())
                }
                Err(ServerError::Storage(e)) => Err(e),
                Err(e) => {
                    fault = Some(e);
                    Err(StorageError::Backend("server fault".into()))
                }
            }
        });

        if let Some(e) = fault {
            return Err(e);
        }
        match decision {
            Some(BatchDecision::FreshReject(reason)) => {
                self.record_rejection(batch, &reason)?;
                Ok(BatchDecision::FreshReject(reason))
            }
            Some(d) => {
                txn_result?;
                Ok(d)
            }
            None => {
                txn_result?;
                Err(ServerError::CorruptRow {
                    table: APPLIED_BATCHES_TABLE.into(),
                    detail: "transaction committed without a decision".into(),
                })
            }
        }
    }

    fn decide(
        txn: &mut dyn StorageTxn,
        batch: &MutationBatch,
        commit_ms: i64,
    ) -> ServerResult<BatchDecision> {
        match oplog::resolution(txn, batch.id)? {
            Some(Resolution::Applied { .. }) => Ok(BatchDecision::Duplicate),
            Some(Resolution::Rejected { reason }) => Ok(BatchDecision::ReplayReject(reason)),
            None => match apply::apply_batch(txn, batch, commit_ms) {
                Ok(effective) => {
                    // The oplog carries the batch as applied, not as
                    // submitted: resolution may have rewritten a patch,
                    // and the catch-up feed must replay the applied form.
                    let committed = MutationBatch {
                        id: batch.id,
                        origin_db: batch.origin_db.clone(),
                        origin_node: batch.origin_node.clone(),
                        mutations: effective,
                    };
                    oplog::record_commit(txn, &committed, commit_ms)?;
                    Ok(BatchDecision::Applied(commit_ms))
                }
                Err(ApplyError::Reject(reason)) => Ok(BatchDecision::FreshReject(reason)),
                Err(ApplyError::Fault(e)) => Err(e),
            },
        }
    }

    fn record_rejection(&self, batch: &MutationBatch, reason: &str) -> ServerResult<()> {
        let mut fault: Option<ServerError> = None;
        let result = self.driver.transaction(|txn| {
            oplog::record_rejection(txn, batch.id, reason).map_err(|e| match e {
                ServerError::Storage(s) => s,
                other => {
                    fault = Some(other);
                    StorageError::Backend("server fault".into())
                }
            })
        });
        match fault {
            Some(e) => Err(e),
            None => result.map_err(ServerError::from),
        }
    }

    /// Allocates the next commit timestamp: wall clock, but never at or
    /// below the previously allocated one.
    fn next_timestamp_ms(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let mut last = self.last_timestamp_ms.lock();
        let next = now.max(*last + 1);
        *last = next;
        next
    }
}
