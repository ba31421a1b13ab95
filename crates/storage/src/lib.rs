//! Storage layer for tessera
//!
//! This crate implements the ordered transactional key-value engine the
//! object store runs on:
//! - KvStore: BTreeMap tables behind a RwLock, one writer at a time
//! - Transaction: buffered writes, read-your-writes, atomic commit
//! - ReadView: consistent read access to committed state
//! - ColumnFamily / TableId: per-model table namespaces
//!
//! Everything is in memory; durability is out of scope.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod column_family;
pub mod error;
pub mod kv;
pub mod store;

pub use column_family::{ColumnFamily, TableId};
pub use error::{StorageError, StorageResult};
pub use kv::{KvEntry, KvIter, KvRead, KvWrite, SCAN_PAGE_SIZE};
pub use store::{KvStore, ReadView, Transaction};
