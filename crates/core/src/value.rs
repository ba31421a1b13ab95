//! Value types for tessera
//!
//! This module defines:
//! - `Value`: every value a property can hold, scalar or composite
//! - `TypedValue`: a value tagged with the type index of a multi-type property
//! - `Values`: the field map of a row or embedded object, keyed by property index
//!
//! ## Ordering
//!
//! `Value` is totally ordered so it can be a set item or map key. Different
//! kinds order by kind first. Floats use `f64::total_cmp`, so `NaN == NaN`
//! and `-0.0 != 0.0`. Equality is defined through the same ordering.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// A property value
#[derive(Debug, Clone)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Signed 64-bit integer
    Int(i64),
    /// Unsigned 64-bit integer
    UInt(u64),
    /// 64-bit float
    Float(f64),
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Index of an enum case
    Enum(u32),
    /// Ordered list
    List(Vec<Value>),
    /// Set of unique items
    Set(BTreeSet<Value>),
    /// Map with unique keys
    Map(BTreeMap<Value, Value>),
    /// Embedded object
    Embed(Values),
    /// Multi-type value
    Typed(TypedValue),
}

/// A value of a multi-type property
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TypedValue {
    /// Index of the type within the multi-type definition
    pub type_index: u32,
    /// The payload
    pub value: Box<Value>,
}

impl TypedValue {
    /// Create a typed value
    pub fn new(type_index: u32, value: Value) -> Self {
        TypedValue {
            type_index,
            value: Box::new(value),
        }
    }
}

impl Value {
    /// Short name of the value kind, used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Enum(_) => "enum",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Embed(_) => "embed",
            Value::Typed(_) => "typed",
        }
    }

    /// Whether the value is a scalar stored in a single cell
    pub fn is_scalar(&self) -> bool {
        !matches!(
            self,
            Value::List(_) | Value::Set(_) | Value::Map(_) | Value::Embed(_) | Value::Typed(_)
        )
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int(_) => 1,
            Value::UInt(_) => 2,
            Value::Float(_) => 3,
            Value::Text(_) => 4,
            Value::Bytes(_) => 5,
            Value::Enum(_) => 6,
            Value::List(_) => 7,
            Value::Set(_) => 8,
            Value::Map(_) => 9,
            Value::Embed(_) => 10,
            Value::Typed(_) => 11,
        }
    }

    /// Element count of a container, `None` for other kinds
    pub fn container_len(&self) -> Option<usize> {
        match self {
            Value::List(v) => Some(v.len()),
            Value::Set(v) => Some(v.len()),
            Value::Map(v) => Some(v.len()),
            _ => None,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::UInt(a), Value::UInt(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Enum(a), Value::Enum(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            (Value::Set(a), Value::Set(b)) => a.cmp(b),
            (Value::Map(a), Value::Map(b)) => a.cmp(b),
            (Value::Embed(a), Value::Embed(b)) => a.cmp(b),
            (Value::Typed(a), Value::Typed(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::UInt(u) => write!(f, "{u}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "{} bytes", b.len()),
            Value::Enum(e) => write!(f, "enum({e})"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Set(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "}}")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Embed(values) => write!(f, "{values}"),
            Value::Typed(t) => write!(f, "{}({})", t.type_index, t.value),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Values> for Value {
    fn from(v: Values) -> Self {
        Value::Embed(v)
    }
}

/// Field values of an object, keyed by property index
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Values(BTreeMap<u32, Value>);

impl Values {
    /// Empty field map
    pub fn new() -> Self {
        Values(BTreeMap::new())
    }

    /// Builder-style insert
    pub fn with(mut self, index: u32, value: impl Into<Value>) -> Self {
        self.0.insert(index, value.into());
        self
    }

    /// Insert or replace a field
    pub fn insert(&mut self, index: u32, value: Value) -> Option<Value> {
        self.0.insert(index, value)
    }

    /// Field by property index
    pub fn get(&self, index: u32) -> Option<&Value> {
        self.0.get(&index)
    }

    /// Mutable field by property index
    pub fn get_mut(&mut self, index: u32) -> Option<&mut Value> {
        self.0.get_mut(&index)
    }

    /// Remove a field
    pub fn remove(&mut self, index: u32) -> Option<Value> {
        self.0.remove(&index)
    }

    /// Fields in property index order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Value)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    /// Number of fields set
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no field is set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(u32, Value)> for Values {
    fn from_iter<T: IntoIterator<Item = (u32, Value)>>(iter: T) -> Self {
        Values(iter.into_iter().collect())
    }
}

impl std::fmt::Display for Values {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}: {v}")?;
        }
        write!(f, "}}")
    }
}
