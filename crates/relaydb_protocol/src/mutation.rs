//! Mutation and undo model.

use relaydb_codec::{row_id, Row, RowPatch};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of a mutation operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// Rows were created.
    Insert,
    /// A row's columns were patched.
    Update,
    /// Rows were removed.
    Delete,
}

impl MutationKind {
    /// Stable string form, used in the row write ledger.
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Insert => "insert",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        }
    }

    /// Parses the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "insert" => Some(MutationKind::Insert),
            "update" => Some(MutationKind::Update),
            "delete" => Some(MutationKind::Delete),
            _ => None,
        }
    }
}

/// A single forward or inverse operation against one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutationOp {
    /// Insert fully materialized rows.
    Insert {
        /// The rows to insert.
        rows: Vec<Row>,
    },
    /// Patch one row's columns.
    Update {
        /// Target row id.
        id: String,
        /// Column patch to merge.
        patch: RowPatch,
    },
    /// Delete rows by id.
    Delete {
        /// Target row ids.
        ids: Vec<String>,
    },
}

impl MutationOp {
    /// The kind of this operation.
    pub fn kind(&self) -> MutationKind {
        match self {
            MutationOp::Insert { .. } => MutationKind::Insert,
            MutationOp::Update { .. } => MutationKind::Update,
            MutationOp::Delete { .. } => MutationKind::Delete,
        }
    }

    /// Ids of the rows this operation touches.
    pub fn row_ids(&self) -> Vec<String> {
        match self {
            MutationOp::Insert { rows } => rows
                .iter()
                .filter_map(|r| row_id(r).map(str::to_string))
                .collect(),
            MutationOp::Update { id, .. } => vec![id.clone()],
            MutationOp::Delete { ids } => ids.clone(),
        }
    }
}

/// A forward operation paired with the inverse that undoes it.
///
/// # Invariant
///
/// Applying `op` and then `undo` to a dataset leaves it unchanged:
/// - insert is undone by deleting the inserted ids
/// - update is undone by a patch restoring the prior values of exactly
///   the patched columns (columns absent before the update restore to
///   null, i.e. absent)
/// - delete is undone by re-inserting the fully materialized prior rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// The table this mutation targets.
    pub table: String,
    /// The forward operation.
    pub op: MutationOp,
    /// The inverse operation.
    pub undo: MutationOp,
}

impl Mutation {
    /// Builds an insert mutation; the undo deletes the inserted ids.
    pub fn insert(table: impl Into<String>, rows: Vec<Row>) -> Self {
        let ids = rows
            .iter()
            .filter_map(|r| row_id(r).map(str::to_string))
            .collect();
        Self {
            table: table.into(),
            op: MutationOp::Insert { rows },
            undo: MutationOp::Delete { ids },
        }
    }

    /// Builds an update mutation from the patch and the row's prior state.
    ///
    /// The undo patch carries the prior value of every patched column,
    /// with null standing in for columns the row did not have before.
    pub fn update(
        table: impl Into<String>,
        id: impl Into<String>,
        patch: RowPatch,
        prior: &Row,
    ) -> Self {
        let id = id.into();
        let undo_patch: RowPatch = patch
            .keys()
            .map(|column| {
                let prior_value = prior.get(column).cloned().unwrap_or(Value::Null);
                (column.clone(), prior_value)
            })
            .collect();
        Self {
            table: table.into(),
            op: MutationOp::Update {
                id: id.clone(),
                patch,
            },
            undo: MutationOp::Update {
                id,
                patch: undo_patch,
            },
        }
    }

    /// Builds a delete mutation from the fully materialized prior rows;
    /// the undo re-inserts them.
    pub fn delete(table: impl Into<String>, prior_rows: Vec<Row>) -> Self {
        let ids = prior_rows
            .iter()
            .filter_map(|r| row_id(r).map(str::to_string))
            .collect();
        Self {
            table: table.into(),
            op: MutationOp::Delete { ids },
            undo: MutationOp::Insert { rows: prior_rows },
        }
    }

    /// The forward operation's kind.
    pub fn kind(&self) -> MutationKind {
        self.op.kind()
    }

    /// Returns the mutation with forward and inverse operations swapped.
    pub fn inverted(&self) -> Mutation {
        Mutation {
            table: self.table.clone(),
            op: self.undo.clone(),
            undo: self.op.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: &str, pairs: &[(&str, Value)]) -> Row {
        let mut r = Row::new();
        r.insert("id".into(), json!(id));
        for (k, v) in pairs {
            r.insert(k.to_string(), v.clone());
        }
        r
    }

    #[test]
    fn insert_undo_deletes_ids() {
        let m = Mutation::insert("users", vec![row("a", &[]), row("b", &[])]);
        assert_eq!(m.kind(), MutationKind::Insert);
        assert_eq!(
            m.undo,
            MutationOp::Delete {
                ids: vec!["a".into(), "b".into()]
            }
        );
    }

    #[test]
    fn update_undo_restores_prior_values() {
        let prior = row("a", &[("name", json!("old"))]);
        let mut patch = RowPatch::new();
        patch.insert("name".into(), json!("new"));
        patch.insert("email".into(), json!("a@x")); // column did not exist

        let m = Mutation::update("users", "a", patch, &prior);

        let MutationOp::Update { patch: undo, .. } = &m.undo else {
            panic!("expected update undo");
        };
        assert_eq!(undo.get("name"), Some(&json!("old")));
        // Absent-before column restores to null (absent)
        assert_eq!(undo.get("email"), Some(&Value::Null));
    }

    #[test]
    fn delete_undo_reinserts_prior_rows() {
        let prior = vec![row("a", &[("name", json!("x"))])];
        let m = Mutation::delete("users", prior.clone());
        assert_eq!(m.op, MutationOp::Delete { ids: vec!["a".into()] });
        assert_eq!(m.undo, MutationOp::Insert { rows: prior });
    }

    #[test]
    fn inverted_swaps_op_and_undo() {
        let m = Mutation::insert("users", vec![row("a", &[])]);
        let inv = m.inverted();
        assert_eq!(inv.op, m.undo);
        assert_eq!(inv.undo, m.op);
        assert_eq!(inv.inverted(), m);
    }

    #[test]
    fn kind_string_roundtrip() {
        for kind in [MutationKind::Insert, MutationKind::Update, MutationKind::Delete] {
            assert_eq!(MutationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MutationKind::parse("upsert"), None);
    }

    #[test]
    fn serde_roundtrip() {
        let m = Mutation::update(
            "users",
            "a",
            RowPatch::from([("name".to_string(), json!("new"))]),
            &row("a", &[("name", json!("old"))]),
        );
        let text = serde_json::to_string(&m).unwrap();
        let back: Mutation = serde_json::from_str(&text).unwrap();
        assert_eq!(back, m);
    }
}
