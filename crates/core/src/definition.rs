//! Property and data model definitions
//!
//! A `DataModel` maps property indexes to `PropertyDefinition`s. Definitions
//! carry the validation constraints (required, final, unique, ranges, sizes,
//! regex) and the kind that decides how the value is laid out in storage.
//!
//! ## Layout rules
//!
//! - Property indexes start at 1; qualifier bytes below 9 are reserved for
//!   row metadata.
//! - List and set items, and map keys, are scalars.
//! - Map values, embedded fields and multi-type payloads may be any kind.

use crate::error::{Error, Result};
use crate::indexable::Indexable;
use crate::key::DEFAULT_KEY_SIZE;
use crate::value::Value;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Kind of a single-cell value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    /// `Value::Bool`
    Bool,
    /// `Value::Int`
    Int,
    /// `Value::UInt`
    UInt,
    /// `Value::Float`
    Float,
    /// `Value::Text`
    Text,
    /// `Value::Bytes`
    Bytes,
    /// `Value::Enum` with case indexes below `cases`
    Enum {
        /// Number of enum cases
        cases: u32,
    },
}

impl ScalarKind {
    /// Whether `value` has this kind
    pub fn matches(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ScalarKind::Bool, Value::Bool(_))
                | (ScalarKind::Int, Value::Int(_))
                | (ScalarKind::UInt, Value::UInt(_))
                | (ScalarKind::Float, Value::Float(_))
                | (ScalarKind::Text, Value::Text(_))
                | (ScalarKind::Bytes, Value::Bytes(_))
                | (ScalarKind::Enum { .. }, Value::Enum(_))
        )
    }

    /// Short name, used in error messages
    pub fn name(&self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Int => "int",
            ScalarKind::UInt => "uint",
            ScalarKind::Float => "float",
            ScalarKind::Text => "text",
            ScalarKind::Bytes => "bytes",
            ScalarKind::Enum { .. } => "enum",
        }
    }
}

/// Storage tag in the low three bits of a property segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StorageTag {
    /// Single cell value
    Value = 1,
    /// Embedded object marker plus field cells
    Embed = 2,
    /// Count cell plus indexed item cells
    List = 3,
    /// Count cell plus content-addressed item cells
    Set = 4,
    /// Count cell plus key-addressed value cells
    Map = 5,
    /// Tagged cell, optionally followed by payload cells
    MultiType = 6,
}

impl StorageTag {
    /// Parse the low three bits of a segment
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            1 => Some(StorageTag::Value),
            2 => Some(StorageTag::Embed),
            3 => Some(StorageTag::List),
            4 => Some(StorageTag::Set),
            5 => Some(StorageTag::Map),
            6 => Some(StorageTag::MultiType),
            _ => None,
        }
    }
}

/// What a property holds
#[derive(Debug, Clone)]
pub enum PropertyKind {
    /// Single cell value
    Scalar(ScalarKind),
    /// Ordered list of scalars
    List(Box<PropertyDefinition>),
    /// Set of scalars
    Set(Box<PropertyDefinition>),
    /// Map from scalar keys to any value
    Map {
        /// Key definition
        key: Box<PropertyDefinition>,
        /// Value definition
        value: Box<PropertyDefinition>,
    },
    /// Map whose `UInt` keys are assigned by the store
    IncrementingMap {
        /// Key definition, always `UInt`
        key: Box<PropertyDefinition>,
        /// Value definition
        value: Box<PropertyDefinition>,
    },
    /// Nested object
    Embed(Arc<DataModel>),
    /// Tagged union keyed by type index
    MultiType(BTreeMap<u32, PropertyDefinition>),
}

impl PropertyKind {
    /// Storage tag used in qualifier segments
    pub fn storage_tag(&self) -> StorageTag {
        match self {
            PropertyKind::Scalar(_) => StorageTag::Value,
            PropertyKind::Embed(_) => StorageTag::Embed,
            PropertyKind::List(_) => StorageTag::List,
            PropertyKind::Set(_) => StorageTag::Set,
            PropertyKind::Map { .. } | PropertyKind::IncrementingMap { .. } => StorageTag::Map,
            PropertyKind::MultiType(_) => StorageTag::MultiType,
        }
    }

    /// Scalar kind if this is a single-cell property
    pub fn scalar(&self) -> Option<ScalarKind> {
        match self {
            PropertyKind::Scalar(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Whether the property keeps a count cell
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            PropertyKind::List(_)
                | PropertyKind::Set(_)
                | PropertyKind::Map { .. }
                | PropertyKind::IncrementingMap { .. }
        )
    }

    /// Short name, used in error messages
    pub fn name(&self) -> &'static str {
        match self {
            PropertyKind::Scalar(kind) => kind.name(),
            PropertyKind::List(_) => "list",
            PropertyKind::Set(_) => "set",
            PropertyKind::Map { .. } => "map",
            PropertyKind::IncrementingMap { .. } => "incrementing map",
            PropertyKind::Embed(_) => "embed",
            PropertyKind::MultiType(_) => "multi-type",
        }
    }
}

/// Definition of one property
#[derive(Debug, Clone)]
pub struct PropertyDefinition {
    /// Human readable name
    pub name: String,
    /// Value kind
    pub kind: PropertyKind,
    /// Must be present on every row
    pub required: bool,
    /// Cannot change once set
    pub is_final: bool,
    /// At most one row may hold a given value
    pub unique: bool,
    /// Inclusive lower bound for scalars
    pub min_value: Option<Value>,
    /// Inclusive upper bound for scalars
    pub max_value: Option<Value>,
    /// Minimum container size
    pub min_size: Option<u32>,
    /// Maximum container size
    pub max_size: Option<u32>,
    /// Pattern text values must match in full
    pub regex: Option<Regex>,
}

impl PropertyDefinition {
    /// Definition with no constraints
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        PropertyDefinition {
            name: name.into(),
            kind,
            required: false,
            is_final: false,
            unique: false,
            min_value: None,
            max_value: None,
            min_size: None,
            max_size: None,
            regex: None,
        }
    }

    /// Boolean property
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Scalar(ScalarKind::Bool))
    }

    /// Signed integer property
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Scalar(ScalarKind::Int))
    }

    /// Unsigned integer property
    pub fn uint(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Scalar(ScalarKind::UInt))
    }

    /// Float property
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Scalar(ScalarKind::Float))
    }

    /// Text property
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Scalar(ScalarKind::Text))
    }

    /// Bytes property
    pub fn bytes(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Scalar(ScalarKind::Bytes))
    }

    /// Enum property with `cases` cases
    pub fn enumeration(name: impl Into<String>, cases: u32) -> Self {
        Self::new(name, PropertyKind::Scalar(ScalarKind::Enum { cases }))
    }

    /// List property
    pub fn list(name: impl Into<String>, item: PropertyDefinition) -> Self {
        Self::new(name, PropertyKind::List(Box::new(item)))
    }

    /// Set property
    pub fn set(name: impl Into<String>, item: PropertyDefinition) -> Self {
        Self::new(name, PropertyKind::Set(Box::new(item)))
    }

    /// Map property
    pub fn map(name: impl Into<String>, key: PropertyDefinition, value: PropertyDefinition) -> Self {
        Self::new(
            name,
            PropertyKind::Map {
                key: Box::new(key),
                value: Box::new(value),
            },
        )
    }

    /// Incrementing map property
    pub fn incrementing_map(name: impl Into<String>, value: PropertyDefinition) -> Self {
        Self::new(
            name,
            PropertyKind::IncrementingMap {
                key: Box::new(PropertyDefinition::uint("key")),
                value: Box::new(value),
            },
        )
    }

    /// Embedded object property
    pub fn embed(name: impl Into<String>, model: DataModel) -> Self {
        Self::new(name, PropertyKind::Embed(Arc::new(model)))
    }

    /// Multi-type property
    pub fn multi_type(
        name: impl Into<String>,
        types: impl IntoIterator<Item = (u32, PropertyDefinition)>,
    ) -> Self {
        Self::new(name, PropertyKind::MultiType(types.into_iter().collect()))
    }

    /// Mark as required
    pub fn with_required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as final
    pub fn with_final(mut self) -> Self {
        self.is_final = true;
        self
    }

    /// Mark as unique
    pub fn with_unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set inclusive value bounds
    pub fn with_range(mut self, min: Option<Value>, max: Option<Value>) -> Self {
        self.min_value = min;
        self.max_value = max;
        self
    }

    /// Set container size bounds
    pub fn with_size(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.min_size = min;
        self.max_size = max;
        self
    }

    /// Require text values to match `pattern` in full
    pub fn with_regex(mut self, pattern: &str) -> Result<Self> {
        let anchored = format!("^(?:{pattern})$");
        let regex = Regex::new(&anchored)
            .map_err(|e| Error::InvalidDefinition(format!("invalid regex '{pattern}': {e}")))?;
        self.regex = Some(regex);
        Ok(self)
    }

    /// Scalar kind if this is a single-cell property
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        self.kind.scalar()
    }

    fn check(&self) -> Result<()> {
        match &self.kind {
            PropertyKind::Scalar(_) => Ok(()),
            PropertyKind::List(item) | PropertyKind::Set(item) => {
                if item.kind.scalar().is_none() {
                    return Err(Error::InvalidDefinition(format!(
                        "items of '{}' must be scalar, got {}",
                        self.name,
                        item.kind.name()
                    )));
                }
                Ok(())
            }
            PropertyKind::Map { key, value } | PropertyKind::IncrementingMap { key, value } => {
                if key.kind.scalar().is_none() {
                    return Err(Error::InvalidDefinition(format!(
                        "keys of '{}' must be scalar",
                        self.name
                    )));
                }
                value.check()
            }
            PropertyKind::Embed(_) => Ok(()),
            PropertyKind::MultiType(types) => {
                if types.is_empty() {
                    return Err(Error::InvalidDefinition(format!(
                        "multi-type '{}' has no types",
                        self.name
                    )));
                }
                types.values().try_for_each(PropertyDefinition::check)
            }
        }
    }
}

/// Definition of a row type or embedded object
#[derive(Debug, Clone)]
pub struct DataModel {
    /// Model name, unique within a store
    pub name: String,
    /// Length of row keys in bytes
    pub key_size: usize,
    properties: BTreeMap<u32, PropertyDefinition>,
    indexes: Vec<Indexable>,
}

impl DataModel {
    /// Empty model with 16 byte keys
    pub fn new(name: impl Into<String>) -> Self {
        DataModel {
            name: name.into(),
            key_size: DEFAULT_KEY_SIZE,
            properties: BTreeMap::new(),
            indexes: Vec::new(),
        }
    }

    /// Use keys of `key_size` bytes
    pub fn with_key_size(mut self, key_size: usize) -> Self {
        self.key_size = key_size;
        self
    }

    /// Add a property
    ///
    /// # Errors
    ///
    /// Fails for index 0, a duplicate index, or non-scalar collection items.
    pub fn property(mut self, index: u32, definition: PropertyDefinition) -> Result<Self> {
        if index == 0 {
            return Err(Error::InvalidDefinition(format!(
                "property '{}' must have an index of at least 1",
                definition.name
            )));
        }
        if self.properties.contains_key(&index) {
            return Err(Error::InvalidDefinition(format!(
                "duplicate property index {index} in model '{}'",
                self.name
            )));
        }
        definition.check()?;
        self.properties.insert(index, definition);
        Ok(self)
    }

    /// Declare a secondary index
    ///
    /// # Errors
    ///
    /// Fails when the index does not resolve to scalar properties.
    pub fn index(mut self, indexable: Indexable) -> Result<Self> {
        indexable.validate(&self)?;
        self.indexes.push(indexable);
        Ok(self)
    }

    /// Property definition by index
    pub fn get(&self, index: u32) -> Option<&PropertyDefinition> {
        self.properties.get(&index)
    }

    /// Property by name
    pub fn property_by_name(&self, name: &str) -> Option<(u32, &PropertyDefinition)> {
        self.properties
            .iter()
            .find(|(_, def)| def.name == name)
            .map(|(index, def)| (*index, def))
    }

    /// Properties in index order
    pub fn properties(&self) -> impl Iterator<Item = (u32, &PropertyDefinition)> {
        self.properties.iter().map(|(index, def)| (*index, def))
    }

    /// Declared secondary indexes
    pub fn indexes(&self) -> &[Indexable] {
        &self.indexes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_zero_rejected() {
        let result = DataModel::new("m").property(0, PropertyDefinition::text("a"));
        assert!(matches!(result, Err(Error::InvalidDefinition(_))));
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let result = DataModel::new("m")
            .property(1, PropertyDefinition::text("a"))
            .and_then(|m| m.property(1, PropertyDefinition::text("b")));
        assert!(result.is_err());
    }

    #[test]
    fn test_list_of_embeds_rejected() {
        let inner = DataModel::new("inner");
        let result = DataModel::new("m").property(
            1,
            PropertyDefinition::list("l", PropertyDefinition::embed("e", inner)),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_storage_tags() {
        assert_eq!(PropertyDefinition::int("a").kind.storage_tag(), StorageTag::Value);
        assert_eq!(
            PropertyDefinition::incrementing_map("m", PropertyDefinition::text("v"))
                .kind
                .storage_tag(),
            StorageTag::Map
        );
        assert_eq!(StorageTag::from_bits(6), Some(StorageTag::MultiType));
        assert_eq!(StorageTag::from_bits(0), None);
    }

    #[test]
    fn test_regex_is_anchored() {
        let def = PropertyDefinition::text("code").with_regex("[a-z]+").unwrap();
        let regex = def.regex.unwrap();
        assert!(regex.is_match("abc"));
        assert!(!regex.is_match("abc1"));
    }

    #[test]
    fn test_invalid_regex() {
        assert!(PropertyDefinition::text("code").with_regex("(").is_err());
    }

    #[test]
    fn test_property_by_name() {
        let model = DataModel::new("person")
            .property(1, PropertyDefinition::text("name"))
            .unwrap()
            .property(2, PropertyDefinition::uint("age"))
            .unwrap();
        let (index, def) = model.property_by_name("age").unwrap();
        assert_eq!(index, 2);
        assert_eq!(def.scalar_kind(), Some(ScalarKind::UInt));
    }
}
