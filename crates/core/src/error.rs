//! Error types for tessera
//!
//! Two layers of errors live here:
//! - `Error`: internal codec and definition failures (decoding bytes,
//!   resolving references against a model). These never reach callers
//!   directly; the engine converts them.
//! - `StoreError`: the public failure taxonomy returned by store actions.
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::key::Key;
use crate::reference::PropertyReference;
use crate::validation::ValidationViolation;
use thiserror::Error;

/// Result type alias for codec and definition operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Internal errors raised by codecs and definition lookups
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Bytes could not be decoded
    #[error("Decoding error: {0}")]
    Decode(String),

    /// A reference does not resolve against the data model
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// A value does not have the shape its definition requires
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Kind required by the definition
        expected: String,
        /// Kind of the supplied value
        actual: String,
    },

    /// Model definition is malformed
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    /// Stored data contradicts its own layout
    #[error("Data corruption: {0}")]
    Corruption(String),
}

/// Failure taxonomy of store actions
///
/// Validation failures are collected across all changes of a request and
/// reported together. Every other variant is returned as soon as it occurs.
#[derive(Debug, Error)]
pub enum StoreError {
    /// One or more constraint violations
    #[error("Validation failed: {}", format_violations(.0))]
    ValidationFail(Vec<ValidationViolation>),

    /// The addressed row does not exist
    #[error("Object with key {0} does not exist")]
    DoesNotExist(Key),

    /// A unique value or row key is already owned by another row
    #[error("Already exists: {key}{}", .reference.as_ref().map(|r| format!(" at {r}")).unwrap_or_default())]
    AlreadyExists {
        /// Unique property that collided, `None` for a duplicate row key
        reference: Option<PropertyReference>,
        /// Key of the row owning the value
        key: Key,
    },

    /// Unexpected internal or storage failure
    #[error("Server failure: {message}")]
    ServerFail {
        /// Human readable description
        message: String,
        /// Underlying cause
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Caller misuse, such as an illegal reference kind for the operation
    #[error("Request exception: {0}")]
    RequestException(String),
}

impl StoreError {
    /// Create a `ServerFail` without a source
    pub fn server(message: impl Into<String>) -> Self {
        StoreError::ServerFail {
            message: message.into(),
            source: None,
        }
    }

    /// Create a `RequestException`
    pub fn request(message: impl Into<String>) -> Self {
        StoreError::RequestException(message.into())
    }

    /// Build the failure for a set of collected violations
    ///
    /// A single uniqueness collision is reported as `AlreadyExists`; any
    /// other set, several collisions included, is wrapped in
    /// `ValidationFail`.
    pub fn from_violations(mut violations: Vec<ValidationViolation>) -> Self {
        if let [ValidationViolation::AlreadyExists { .. }] = violations.as_slice() {
            if let Some(ValidationViolation::AlreadyExists { reference, key }) = violations.pop() {
                return StoreError::AlreadyExists {
                    reference: Some(reference),
                    key,
                };
            }
        }
        StoreError::ValidationFail(violations)
    }

    /// Collected violations, empty for other variants
    pub fn violations(&self) -> &[ValidationViolation] {
        match self {
            StoreError::ValidationFail(v) => v,
            _ => &[],
        }
    }
}

impl From<Error> for StoreError {
    fn from(e: Error) -> Self {
        match e {
            Error::InvalidReference(msg) => StoreError::RequestException(msg),
            other => StoreError::ServerFail {
                message: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }
}

fn format_violations(violations: &[ValidationViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
