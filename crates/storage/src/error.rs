//! Storage errors

use crate::column_family::TableId;
use tessera_core::StoreError;
use thiserror::Error;

/// Result type alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Failures of the key-value engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Table was never created
    #[error("Unknown table {0}")]
    UnknownTable(TableId),

    /// Tables of a model were created twice
    #[error("Tables for model {0} already exist")]
    ModelExists(u32),
}

impl From<StorageError> for StoreError {
    fn from(e: StorageError) -> Self {
        StoreError::ServerFail {
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }
}
