//! # RelayDB Storage
//!
//! The relational storage-driver contract consumed by the sync subsystem,
//! plus an in-memory reference driver.
//!
//! The sync layer never interprets SQL; it talks to the relational layer
//! exclusively through [`StorageDriver`]: named tables of JSON rows with
//! insert/update/delete/get/scan plus a transaction facility. Any real
//! driver (SQLite, Postgres, ...) can sit behind the same trait; the
//! in-memory [`MemoryDriver`] is the reference implementation used by
//! tests and by the reference sync server.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod driver;
mod error;
mod memory;

pub use driver::{StorageDriver, StorageTxn};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryDriver;
