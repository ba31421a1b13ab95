//! Core types for Tessera
//!
//! This crate defines everything that does not touch storage:
//! - Key, Version: row identity and mutation ordering
//! - Value, Values: property values and field maps
//! - DataModel, PropertyDefinition: schemas with validation constraints
//! - PropertyReference: paths to values within a row
//! - Indexable: secondary index expressions
//! - Change: mutation operations and their echoes
//! - codec: qualifier, cell and scalar byte encodings
//! - Error, StoreError: codec errors and the public failure taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod change;
pub mod codec;
pub mod definition;
pub mod error;
pub mod indexable;
pub mod key;
pub mod reference;
pub mod validation;
pub mod value;
pub mod varint;
pub mod version;

pub use change::{
    Change, IncrementingMapAddition, IncrementingMapChange, IndexUpdate, ListChange, MapChange,
    SetChange,
};
pub use codec::{CellValue, DecodedQualifier, TypeIndicator};
pub use definition::{DataModel, PropertyDefinition, PropertyKind, ScalarKind, StorageTag};
pub use error::{Error, Result, StoreError, StoreResult};
pub use indexable::Indexable;
pub use key::{Key, DEFAULT_KEY_SIZE};
pub use reference::{PropertyReference, RefSegment};
pub use validation::ValidationViolation;
pub use value::{TypedValue, Value, Values};
pub use version::{Version, VERSION_BYTE_SIZE};
