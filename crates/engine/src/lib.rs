//! Object store engine for tessera
//!
//! This crate ties the lower layers together:
//! - DataStore: model registration, add/change/delete, reads
//! - Change processing against a buffered copy of one row
//! - Index and unique maintenance
//! - Qualifier iteration over current and historic tables
//! - Version clock, configuration and update notifications
//!
//! Every mutation is one transaction of the key-value engine and is either
//! applied completely or not at all.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod index;
pub mod node;
mod processor;
pub mod qualifier_iter;
pub mod reader;
pub mod store;
pub mod update;

pub use clock::VersionClock;
pub use config::{StoreConfig, CONFIG_FILE_NAME};
pub use qualifier_iter::ValuePredicate;
pub use store::{
    AddResponse, ChangeResponse, DataStore, GetOptions, HistoricValue, HistoryOptions, IndexEntry,
    ModelId, RegisteredModel, StoredRow,
};
pub use update::{Subscription, Update, UpdateChannel};
