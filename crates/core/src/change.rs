//! Change operations
//!
//! A mutation request is an ordered list of `Change`s applied to one row.
//! The same enum carries the echoes the store reports back: keys assigned
//! by incrementing maps and index deltas. Echo kinds are rejected as input.

use crate::reference::PropertyReference;
use crate::value::Value;
use std::collections::BTreeMap;

/// One operation on a row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Compare stored values with expected ones without mutating
    Check(Vec<(PropertyReference, Value)>),
    /// Set values; `None` deletes
    Change(Vec<(PropertyReference, Option<Value>)>),
    /// Delete values
    Delete(Vec<PropertyReference>),
    /// Edit lists in place
    List(Vec<ListChange>),
    /// Add and remove set items
    Set(Vec<SetChange>),
    /// Put and remove map entries
    Map(Vec<MapChange>),
    /// Append to incrementing maps
    IncrementingMap(Vec<IncrementingMapChange>),
    /// Switch multi-type properties to a complex type
    MultiType(Vec<(PropertyReference, u32)>),
    /// Set or clear the soft-delete flag
    SoftDelete(bool),
    /// Echo: keys assigned by incrementing maps
    IncrementingMapAddition(Vec<IncrementingMapAddition>),
    /// Echo: index deltas
    Index(Vec<IndexUpdate>),
}

impl Change {
    /// Set one value
    pub fn set(reference: impl Into<PropertyReference>, value: impl Into<Value>) -> Self {
        Change::Change(vec![(reference.into(), Some(value.into()))])
    }

    /// Delete one value
    pub fn delete(reference: impl Into<PropertyReference>) -> Self {
        Change::Delete(vec![reference.into()])
    }

    /// Check one value
    pub fn check(reference: impl Into<PropertyReference>, value: impl Into<Value>) -> Self {
        Change::Check(vec![(reference.into(), value.into())])
    }

    /// Name used in logs and errors
    pub fn kind_name(&self) -> &'static str {
        match self {
            Change::Check(_) => "check",
            Change::Change(_) => "change",
            Change::Delete(_) => "delete",
            Change::List(_) => "list",
            Change::Set(_) => "set",
            Change::Map(_) => "map",
            Change::IncrementingMap(_) => "incrementing map",
            Change::MultiType(_) => "multi-type",
            Change::SoftDelete(_) => "soft delete",
            Change::IncrementingMapAddition(_) => "incrementing map addition",
            Change::Index(_) => "index",
        }
    }

    /// Whether the change only ever appears as an echo
    pub fn is_echo(&self) -> bool {
        matches!(self, Change::IncrementingMapAddition(_) | Change::Index(_))
    }
}

/// Edit of one list
///
/// Applied in order: delete every item equal to a value in
/// `delete_values`, insert at the given positions in ascending position
/// order, then append.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListChange {
    /// List property
    pub reference: PropertyReference,
    /// Items to remove, by value
    pub delete_values: Vec<Value>,
    /// Items to insert, by position
    pub add_values_at_index: BTreeMap<u32, Value>,
    /// Items to append
    pub add_values_to_end: Vec<Value>,
}

impl ListChange {
    /// Empty edit of `reference`
    pub fn new(reference: impl Into<PropertyReference>) -> Self {
        ListChange {
            reference: reference.into(),
            ..Default::default()
        }
    }
}

/// Edit of one set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetChange {
    /// Set property
    pub reference: PropertyReference,
    /// Items to add
    pub add_values: Vec<Value>,
    /// Items to remove
    pub delete_values: Vec<Value>,
}

/// Edit of one map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapChange {
    /// Map property
    pub reference: PropertyReference,
    /// Entries to add or replace
    pub put: Vec<(Value, Value)>,
    /// Keys to remove
    pub delete_keys: Vec<Value>,
}

/// Append to one incrementing map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncrementingMapChange {
    /// Map property
    pub reference: PropertyReference,
    /// Values to append
    pub add_values: Vec<Value>,
}

/// Keys assigned to appended values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementingMapAddition {
    /// Map property
    pub reference: PropertyReference,
    /// Assigned keys in the order of the appended values
    pub keys: Vec<u64>,
    /// Appended values
    pub values: Vec<Value>,
}

/// Delta of one index for one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexUpdate {
    /// Entry added or replaced
    Update {
        /// Index reference bytes
        index: Vec<u8>,
        /// New index value
        value: Vec<u8>,
        /// Replaced index value
        previous: Option<Vec<u8>>,
    },
    /// Entry removed
    Delete {
        /// Index reference bytes
        index: Vec<u8>,
        /// Removed index value
        value: Vec<u8>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        assert_eq!(
            Change::set(2u32, 31u64),
            Change::Change(vec![(PropertyReference::property(2), Some(Value::UInt(31)))])
        );
        assert_eq!(Change::delete(1u32), Change::Delete(vec![PropertyReference::property(1)]));
    }

    #[test]
    fn test_echo_kinds() {
        assert!(Change::Index(vec![]).is_echo());
        assert!(Change::IncrementingMapAddition(vec![]).is_echo());
        assert!(!Change::SoftDelete(true).is_echo());
    }

    #[test]
    fn test_list_change_builder() {
        let change = ListChange::new(3u32);
        assert_eq!(change.reference, PropertyReference::property(3));
        assert!(change.add_values_at_index.is_empty());
    }
}
