//! Write policy seam.
//!
//! Applications hang authorization or validation logic on this trait;
//! every write captured through a table handle consults it before
//! anything is applied or queued. Replayed remote history is not subject
//! to the policy; it was checked by its originating replica and resolved
//! by the server.

use relaydb_protocol::MutationOp;

/// Decides whether a local write may proceed.
pub trait WritePolicy: Send + Sync + 'static {
    /// Returns `Err(reason)` to refuse the write.
    fn check(&self, table: &str, op: &MutationOp) -> Result<(), String>;
}

/// The default policy: every write is allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl WritePolicy for AllowAll {
    fn check(&self, _table: &str, _op: &MutationOp) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_allows() {
        let op = MutationOp::Delete { ids: vec!["a".into()] };
        assert!(AllowAll.check("users", &op).is_ok());
    }
}
