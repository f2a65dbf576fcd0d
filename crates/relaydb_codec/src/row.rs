//! Base row types shared across the workspace.

use serde_json::Value;
use std::collections::BTreeMap;

/// A single table row: column name to JSON value.
///
/// Every row carries a string `"id"` column as its primary key. A missing
/// column and a `Null` column are equivalent; codecs and merge logic
/// normalize `Null` to absent.
pub type Row = BTreeMap<String, Value>;

/// A partial row update: column name to new value.
///
/// A `Null` value clears the column. Patches are the only update
/// representation in the system; there is no whole-row overwrite on the
/// update path.
pub type RowPatch = BTreeMap<String, Value>;

/// Returns the row's primary key, if present.
pub fn row_id(row: &Row) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

/// Merges a patch into a row in place.
///
/// Columns carried by the patch replace the row's values; `Null` entries
/// remove the column. Columns not named by the patch are untouched. This
/// is the single total merge rule used by both the optimistic local apply
/// and the server's conflict resolution.
pub fn merge_patch(row: &mut Row, patch: &RowPatch) {
    for (column, value) in patch {
        if value.is_null() {
            row.remove(column);
        } else {
            row.insert(column.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn extracts_id() {
        let r = row(&[("id", json!("a1")), ("name", json!("x"))]);
        assert_eq!(row_id(&r), Some("a1"));

        let r = row(&[("name", json!("x"))]);
        assert_eq!(row_id(&r), None);

        // Non-string ids are not primary keys
        let r = row(&[("id", json!(7))]);
        assert_eq!(row_id(&r), None);
    }

    #[test]
    fn patch_replaces_and_clears() {
        let mut r = row(&[("id", json!("a")), ("name", json!("old")), ("tag", json!("t"))]);
        let patch = row(&[("name", json!("new")), ("tag", Value::Null)]);

        merge_patch(&mut r, &patch);

        assert_eq!(r.get("name"), Some(&json!("new")));
        assert!(!r.contains_key("tag"));
        assert_eq!(r.get("id"), Some(&json!("a")));
    }

    #[test]
    fn patch_adds_columns() {
        let mut r = row(&[("id", json!("a"))]);
        let patch = row(&[("email", json!("a@x"))]);

        merge_patch(&mut r, &patch);
        assert_eq!(r.get("email"), Some(&json!("a@x")));
    }
}
