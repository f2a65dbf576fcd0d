//! # RelayDB Sync Server
//!
//! Reference implementation of the authoritative remote endpoint.
//!
//! This crate provides:
//! - Conflict-resolving batch application (`send`)
//! - The catch-up feed of committed batches (`get`)
//! - The streaming bulk-pull producer (`pull`)
//! - The per-row write ledger backing conflict decisions
//!
//! # Architecture
//!
//! The server persists everything (user tables, the row write ledger,
//! the applied-batch log, and the committed-batch oplog) through the
//! same [`relaydb_storage::StorageDriver`] contract clients use, so
//! storage semantics are identical on both sides.
//!
//! The server's conflict resolution is final: a batch it rejects is never
//! retried by clients; they undo the optimistic local write and record
//! the rejection in their dead-letter store.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod apply;
mod config;
mod error;
mod ledger;
mod oplog;
mod pull;
mod server;

pub use config::{PullConfig, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use ledger::{LedgerEntry, LEDGER_TABLE};
pub use oplog::{APPLIED_BATCHES_TABLE, OPLOG_TABLE};
pub use pull::PullStream;
pub use server::SyncServer;
