//! Mutation batches and their time-sortable ids.

use crate::error::{ProtocolError, ProtocolResult};
use crate::mutation::Mutation;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

// Timestamp of the most recently generated id. Generation bumps past it,
// so ids from one process sort in generation order even within one
// millisecond (plain `now_v7` does not guarantee that).
static LAST_GENERATED_MS: AtomicI64 = AtomicI64::new(0);

/// Time-sortable unique batch id.
///
/// A UUIDv7: the leading 48 bits are a millisecond timestamp, so lexical
/// order approximates wall-clock send order across nodes. The id doubles
/// as the idempotence key for resubmission, and its embedded timestamp is
/// the batch's logical time for conflict resolution.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    /// Generates a fresh id stamped with the current wall clock.
    ///
    /// Timestamps are strictly increasing within a process, so the ids
    /// of successively captured batches sort in capture order.
    pub fn generate() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let mut prev = LAST_GENERATED_MS.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match LAST_GENERATED_MS.compare_exchange_weak(
                prev,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Self::at(next as u64),
                Err(actual) => prev = actual,
            }
        }
    }

    /// Generates an id stamped with an explicit millisecond timestamp.
    ///
    /// Used by tests to construct batches with controlled logical times.
    pub fn at(timestamp_ms: u64) -> Self {
        let ts = uuid::Timestamp::from_unix(
            uuid::NoContext,
            timestamp_ms / 1000,
            (timestamp_ms % 1000) as u32 * 1_000_000,
        );
        Self(Uuid::new_v7(ts))
    }

    /// The millisecond timestamp embedded in the id, which serves as
    /// the batch's logical time.
    pub fn timestamp_ms(&self) -> i64 {
        match self.0.get_timestamp() {
            Some(ts) => {
                let (secs, nanos) = ts.to_unix();
                (secs as i64) * 1000 + i64::from(nanos) / 1_000_000
            }
            None => 0,
        }
    }

    /// Parses an id from its string form.
    pub fn parse(s: &str) -> ProtocolResult<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ProtocolError::InvalidBatchId(s.to_string()))
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of the node that originated a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Stable node id.
    pub id: Uuid,
    /// Human-readable node name.
    pub name: String,
}

impl NodeInfo {
    /// Creates a node identity with a fresh random id.
    pub fn generate(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

/// An ordered group of mutations applied as one atomic unit.
///
/// All mutations in a batch commit on the remote or none do. The batch id
/// is the idempotence key: resubmitting an already-applied batch must be
/// reported as duplicated, not reapplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationBatch {
    /// Time-sortable unique id.
    pub id: BatchId,
    /// Name of the originating database/replica.
    pub origin_db: String,
    /// Identity of the originating node.
    pub origin_node: NodeInfo,
    /// Mutations in application order.
    pub mutations: Vec<Mutation>,
}

impl MutationBatch {
    /// Creates a batch with a fresh id.
    pub fn new(
        origin_db: impl Into<String>,
        origin_node: NodeInfo,
        mutations: Vec<Mutation>,
    ) -> Self {
        Self {
            id: BatchId::generate(),
            origin_db: origin_db.into(),
            origin_node,
            mutations,
        }
    }

    /// Creates a single-mutation batch with a fresh id.
    pub fn single(
        origin_db: impl Into<String>,
        origin_node: NodeInfo,
        mutation: Mutation,
    ) -> Self {
        Self::new(origin_db, origin_node, vec![mutation])
    }

    /// The batch's logical time in milliseconds.
    pub fn logical_time_ms(&self) -> i64 {
        self.id.timestamp_ms()
    }

    /// Serializes the batch to its persisted JSON form.
    pub fn to_json(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialize(e.to_string()))
    }

    /// Parses a batch from its persisted JSON form.
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialize(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaydb_codec::Row;
    use serde_json::json;

    fn sample_batch() -> MutationBatch {
        let mut row = Row::new();
        row.insert("id".into(), json!("a"));
        row.insert("name".into(), json!("x"));
        MutationBatch::single(
            "db1",
            NodeInfo::generate("laptop"),
            Mutation::insert("users", vec![row]),
        )
    }

    #[test]
    fn ids_are_time_sortable() {
        let earlier = BatchId::at(1_700_000_000_000);
        let later = BatchId::at(1_700_000_000_500);
        assert!(earlier < later);
        assert_eq!(earlier.timestamp_ms(), 1_700_000_000_000);
        assert_eq!(later.timestamp_ms(), 1_700_000_000_500);
    }

    #[test]
    fn generated_ids_carry_current_time() {
        let id = BatchId::generate();
        // Sanity window: after 2023, before 2100.
        assert!(id.timestamp_ms() > 1_600_000_000_000);
        assert!(id.timestamp_ms() < 4_100_000_000_000);
    }

    #[test]
    fn generated_ids_sort_in_generation_order() {
        let ids: Vec<BatchId> = (0..64).map(|_| BatchId::generate()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(sorted, ids);
    }

    #[test]
    fn id_string_roundtrip() {
        let id = BatchId::generate();
        let parsed = BatchId::parse(&id.to_string()).unwrap();
        assert_eq!(parsed, id);

        assert!(BatchId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn json_roundtrip() {
        let batch = sample_batch();
        let text = batch.to_json().unwrap();
        let back = MutationBatch::from_json(&text).unwrap();
        assert_eq!(back, batch);
    }

    #[test]
    fn from_json_rejects_garbage() {
        assert!(MutationBatch::from_json("{").is_err());
    }
}
