//! Remote wire contract types.
//!
//! The remote endpoint exposes three operations: `pull` (byte stream,
//! framed per `relaydb_codec`), `get` (ordered committed batches since a
//! timestamp), and `send` (conflict-resolved batch application). These are
//! the transport-agnostic request/response shapes.

use crate::batch::{BatchId, MutationBatch};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resume state for a bulk pull: table name → row offset.
///
/// Tables absent from the map are already complete and are skipped by the
/// producer; tables present resume from the given row offset.
pub type PullResume = BTreeMap<String, u64>;

/// Prefix of the pull stream's opening snapshot header item.
///
/// Every pull stream opens with a text item `#snapshot:<ms>` carrying the
/// newest commit timestamp already reflected in the snapshot, so the
/// consumer knows where its catch-up feed must start. The `#` prefix keeps
/// the header out of the table-name space.
pub const SNAPSHOT_HEADER_PREFIX: &str = "#snapshot:";

/// Formats the snapshot header item of a pull stream.
pub fn snapshot_header(server_timestamp_ms: i64) -> String {
    format!("{SNAPSHOT_HEADER_PREFIX}{server_timestamp_ms}")
}

/// Extracts the timestamp from a snapshot header item, if `text` is one.
pub fn parse_snapshot_header(text: &str) -> Option<i64> {
    text.strip_prefix(SNAPSHOT_HEADER_PREFIX)?.parse().ok()
}

/// Confirmation of a successfully applied batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfirmation {
    /// The batch id.
    pub id: BatchId,
    /// Authoritative commit time assigned by the remote.
    pub server_timestamp_ms: i64,
}

/// A permanently rejected batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRejection {
    /// The batch id.
    pub id: BatchId,
    /// Why the remote's conflict resolution rejected the batch.
    pub reason: String,
}

/// Per-batch results of a `send` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    /// Batches applied by this call, with their commit times.
    pub succeeded: Vec<BatchConfirmation>,
    /// Batches rejected with finality; the client must undo them locally.
    pub failed: Vec<BatchRejection>,
    /// Batches recognized as already applied (idempotent resubmission).
    pub duplicated: Vec<BatchId>,
}

impl SendOutcome {
    /// True if the outcome carries no results at all.
    pub fn is_empty(&self) -> bool {
        self.succeeded.is_empty() && self.failed.is_empty() && self.duplicated.is_empty()
    }

    /// Looks up the commit time of a succeeded batch.
    pub fn confirmation_for(&self, id: BatchId) -> Option<i64> {
        self.succeeded
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.server_timestamp_ms)
    }
}

/// A batch as committed on the remote, returned by `get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommittedBatch {
    /// The batch as originally submitted.
    pub batch: MutationBatch,
    /// Authoritative commit time.
    pub server_timestamp_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_lookup() {
        let id = BatchId::generate();
        let other = BatchId::generate();
        let outcome = SendOutcome {
            succeeded: vec![BatchConfirmation {
                id,
                server_timestamp_ms: 42,
            }],
            failed: vec![],
            duplicated: vec![],
        };

        assert_eq!(outcome.confirmation_for(id), Some(42));
        assert_eq!(outcome.confirmation_for(other), None);
        assert!(!outcome.is_empty());
        assert!(SendOutcome::default().is_empty());
    }

    #[test]
    fn snapshot_header_roundtrip() {
        assert_eq!(parse_snapshot_header(&snapshot_header(1234)), Some(1234));
        assert_eq!(parse_snapshot_header(&snapshot_header(0)), Some(0));
        assert_eq!(parse_snapshot_header("users"), None);
        assert_eq!(parse_snapshot_header("#snapshot:nope"), None);
    }
}
