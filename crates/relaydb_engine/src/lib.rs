//! # RelayDB Sync Engine
//!
//! Client-side sync for local-first applications: every write lands in
//! local storage immediately and is captured as a mutation batch with
//! full undo information; a durable queue carries batches to the remote
//! when connectivity allows; the remote's conflict decisions flow back as
//! confirmations, rejections, or the committed history of other nodes.
//!
//! # Lifecycle
//!
//! [`Replica::open`] spawns the sync loop, which walks the states of
//! [`SyncState`]: a resumable bulk pull of the remote snapshot, a replay
//! of batches committed since, and then steady-state operation where the
//! queue drains on every local write and the catch-up feed is polled on
//! an interval.
//!
//! # Offline behavior
//!
//! All remote traffic is gated on an [`OnlineDetector`] and retried with
//! exponential backoff. Writes made offline queue up durably and drain in
//! capture order once the detector reports connectivity.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catchup;
mod config;
mod error;
mod local;
mod online;
mod policy;
mod progress;
mod pull;
mod queue;
mod replica;
mod state;
mod table;
mod transport;

pub use config::{BackoffConfig, ReplicaConfig};
pub use error::{EngineError, EngineResult};
pub use online::OnlineDetector;
pub use policy::{AllowAll, WritePolicy};
pub use progress::PROGRESS_TABLE;
pub use queue::{DeadLetter, MutationQueue, DEAD_LETTER_TABLE, QUEUE_TABLE};
pub use replica::Replica;
pub use state::{wait_for_synced, SyncState};
pub use table::SyncedTable;
pub use transport::{RemoteEndpoint, ResilientTransport, TransportError, TransportResult};
