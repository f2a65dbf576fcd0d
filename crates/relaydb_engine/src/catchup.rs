//! Replay of remotely committed batches.
//!
//! The catch-up feed returns batches in commit order. Each one is applied
//! convergently and the last replayed timestamp advances in the same
//! transaction, so a crash mid-feed resumes exactly after the last batch
//! that landed. Replaying a batch this replica originated is harmless:
//! convergent application leaves already-applied effects in place.

use crate::error::EngineResult;
use crate::local;
use crate::progress;
use relaydb_protocol::CommittedBatch;
use relaydb_storage::StorageDriver;
use tracing::debug;

/// Applies committed batches in order, advancing the persisted last
/// replayed timestamp with each one.
pub(crate) fn apply_committed<D: StorageDriver>(
    driver: &D,
    committed: &[CommittedBatch],
) -> EngineResult<()> {
    for entry in committed {
        local::with_txn(driver, |txn| {
            local::apply_mutations(txn, &entry.batch.mutations)?;
            progress::set_last_server_timestamp(txn, entry.server_timestamp_ms)
        })?;
        debug!(
            batch = %entry.batch.id,
            server_timestamp_ms = entry.server_timestamp_ms,
            "committed batch replayed"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaydb_codec::Row;
    use relaydb_protocol::{Mutation, MutationBatch, NodeInfo};
    use relaydb_storage::MemoryDriver;
    use serde_json::json;

    fn row(id: &str, n: i64) -> Row {
        let mut r = Row::new();
        r.insert("id".into(), json!(id));
        r.insert("n".into(), json!(n));
        r
    }

    fn committed(mutation: Mutation, ts: i64) -> CommittedBatch {
        CommittedBatch {
            batch: MutationBatch::single("db", NodeInfo::generate("peer"), mutation),
            server_timestamp_ms: ts,
        }
    }

    #[test]
    fn replays_in_order_and_advances_timestamp() {
        let driver = MemoryDriver::new();
        let feed = vec![
            committed(Mutation::insert("users", vec![row("a", 1)]), 10),
            committed(Mutation::delete("users", vec![row("a", 1)]), 20),
        ];

        apply_committed(&driver, &feed).unwrap();
        assert_eq!(driver.get("users", "a").unwrap(), None);
        assert_eq!(progress::last_server_timestamp(&driver).unwrap(), 20);
    }

    #[test]
    fn empty_feed_changes_nothing() {
        let driver = MemoryDriver::new();
        apply_committed(&driver, &[]).unwrap();
        assert_eq!(progress::last_server_timestamp(&driver).unwrap(), 0);
    }

    #[test]
    fn replay_is_idempotent() {
        let driver = MemoryDriver::new();
        let feed = vec![committed(Mutation::insert("users", vec![row("a", 1)]), 10)];
        apply_committed(&driver, &feed).unwrap();
        apply_committed(&driver, &feed).unwrap();
        assert_eq!(driver.count("users").unwrap(), 1);
    }
}
