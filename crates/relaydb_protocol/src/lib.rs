//! # RelayDB Sync Protocol
//!
//! Protocol types for offline synchronization.
//!
//! This crate provides:
//! - [`Mutation`]: a forward operation paired with its inverse
//! - [`MutationBatch`]: the atomic, idempotent replication unit
//! - The remote wire contract types ([`SendOutcome`], [`CommittedBatch`],
//!   [`PullResume`])
//!
//! This is a pure protocol crate with no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod error;
mod mutation;
mod wire;

pub use batch::{BatchId, MutationBatch, NodeInfo};
pub use error::{ProtocolError, ProtocolResult};
pub use mutation::{Mutation, MutationKind, MutationOp};
pub use wire::{
    parse_snapshot_header, snapshot_header, BatchConfirmation, BatchRejection, CommittedBatch,
    PullResume, SendOutcome, SNAPSHOT_HEADER_PREFIX,
};
