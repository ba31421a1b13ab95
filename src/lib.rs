//! Tessera - typed, versioned object store
//!
//! Rows are described by a [`DataModel`] and stored as sorted qualifier cells
//! in an ordered key-value engine. Every mutation carries a [`Version`];
//! with history retention enabled, older versions of a row stay readable.
//!
//! # Quick Start
//!
//! ```ignore
//! use tessera::{Change, DataModel, DataStore, PropertyDefinition, StoreConfig, Values};
//!
//! let store = DataStore::open(StoreConfig::default())?;
//! let people = store.register_model(
//!     DataModel::new("person").property(1, PropertyDefinition::text("name"))?,
//! )?;
//!
//! let added = store.add(people, None, Values::new().with(1, "ada"))?;
//! store.change(people, &added.key, Some(added.version), vec![Change::set(1u32, "ada l.")])?;
//! ```
//!
//! # Architecture
//!
//! - `tessera-core`: values, schemas, references and byte codecs
//! - `tessera-storage`: the ordered key-value engine and its tables
//! - `tessera-engine`: the [`DataStore`] facade, change processing and indexes

pub use tessera_core::*;
pub use tessera_engine::{
    AddResponse, ChangeResponse, DataStore, GetOptions, HistoricValue, HistoryOptions, IndexEntry,
    ModelId, StoreConfig, StoredRow, Subscription, Update,
};
pub use tessera_storage::{ColumnFamily, KvStore};
