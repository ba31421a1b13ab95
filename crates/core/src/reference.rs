//! Property references
//!
//! A `PropertyReference` is a path of segments from the root of a row to one
//! addressable value: a property, an embedded field, a list item, a set item,
//! a map value or key, or the payload of a multi-type property. The `AnyItem`
//! segment is a wildcard and is only meaningful for fuzzy reads.
//!
//! References are resolved against a `DataModel` to find the definition of
//! the addressed value. Qualifier bytes are produced by `crate::codec::qualifier`.

use crate::definition::{DataModel, PropertyDefinition, PropertyKind};
use crate::error::{Error, Result};
use crate::value::Value;
use smallvec::SmallVec;

/// One step of a property path
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum RefSegment {
    /// Property of the row or of an embedded object
    Property(u32),
    /// List item at a position
    ListItem(u32),
    /// Set item with the given value
    SetItem(Value),
    /// Map value stored under a key
    MapValue(Value),
    /// Map key itself
    MapKey(Value),
    /// Payload of a multi-type property with the given type
    TypedValue(u32),
    /// Any item of a container
    AnyItem,
}

/// Path from the row root to one value
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct PropertyReference {
    segments: SmallVec<[RefSegment; 4]>,
}

impl PropertyReference {
    /// Reference to a top level property
    pub fn property(index: u32) -> Self {
        let mut segments = SmallVec::new();
        segments.push(RefSegment::Property(index));
        PropertyReference { segments }
    }

    /// Build from raw segments
    pub fn from_segments(segments: impl IntoIterator<Item = RefSegment>) -> Self {
        PropertyReference {
            segments: segments.into_iter().collect(),
        }
    }

    fn push(mut self, segment: RefSegment) -> Self {
        self.segments.push(segment);
        self
    }

    /// Field of the embedded object addressed by `self`
    pub fn field(self, index: u32) -> Self {
        self.push(RefSegment::Property(index))
    }

    /// List item at `index`
    pub fn item(self, index: u32) -> Self {
        self.push(RefSegment::ListItem(index))
    }

    /// Set item with value `value`
    pub fn set_item(self, value: impl Into<Value>) -> Self {
        self.push(RefSegment::SetItem(value.into()))
    }

    /// Map value under `key`
    pub fn map_value(self, key: impl Into<Value>) -> Self {
        self.push(RefSegment::MapValue(key.into()))
    }

    /// Map key `key`
    pub fn map_key(self, key: impl Into<Value>) -> Self {
        self.push(RefSegment::MapKey(key.into()))
    }

    /// Payload of type `type_index`
    pub fn typed(self, type_index: u32) -> Self {
        self.push(RefSegment::TypedValue(type_index))
    }

    /// Any item of the container
    pub fn any(self) -> Self {
        self.push(RefSegment::AnyItem)
    }

    /// Segments from root to leaf
    pub fn segments(&self) -> &[RefSegment] {
        &self.segments
    }

    /// Final segment
    pub fn last(&self) -> Option<&RefSegment> {
        self.segments.last()
    }

    /// Reference without its final segment, `None` at top level
    pub fn parent(&self) -> Option<PropertyReference> {
        if self.segments.len() <= 1 {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(PropertyReference { segments })
    }

    /// Whether any segment is a wildcard
    pub fn is_fuzzy(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, RefSegment::AnyItem))
    }

    /// Whether the reference addresses a map key rather than a value
    pub fn is_map_key(&self) -> bool {
        matches!(self.last(), Some(RefSegment::MapKey(_)))
    }

    /// Definition of the value at each segment
    ///
    /// # Errors
    ///
    /// `Error::InvalidReference` when a segment does not fit the kind of its
    /// parent or names an unknown property or type.
    pub fn resolve_path<'m>(&self, model: &'m DataModel) -> Result<Vec<&'m PropertyDefinition>> {
        let mut path: Vec<&'m PropertyDefinition> = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            let next = match path.last() {
                None => match segment {
                    RefSegment::Property(index) => model.get(*index),
                    _ => None,
                },
                Some(parent) => child_definition(*parent, segment),
            };
            match next {
                Some(def) => path.push(def),
                None => {
                    return Err(Error::InvalidReference(format!(
                        "{self} does not resolve in model '{}'",
                        model.name
                    )))
                }
            }
        }
        if path.is_empty() {
            return Err(Error::InvalidReference("empty reference".into()));
        }
        Ok(path)
    }

    /// Definition of the addressed value
    pub fn resolve<'m>(&self, model: &'m DataModel) -> Result<&'m PropertyDefinition> {
        let path = self.resolve_path(model)?;
        path.last()
            .copied()
            .ok_or_else(|| Error::InvalidReference("empty reference".into()))
    }
}

/// Definition reached by stepping from `parent` through `segment`
pub(crate) fn child_definition<'m>(
    parent: &'m PropertyDefinition,
    segment: &RefSegment,
) -> Option<&'m PropertyDefinition> {
    match (&parent.kind, segment) {
        (PropertyKind::Embed(model), RefSegment::Property(index)) => model.get(*index),
        (PropertyKind::List(item), RefSegment::ListItem(_) | RefSegment::AnyItem) => {
            Some(item.as_ref())
        }
        (PropertyKind::Set(item), RefSegment::SetItem(_) | RefSegment::AnyItem) => {
            Some(item.as_ref())
        }
        (
            PropertyKind::Map { key, value } | PropertyKind::IncrementingMap { key, value },
            segment,
        ) => match segment {
            RefSegment::MapValue(_) | RefSegment::AnyItem => Some(value.as_ref()),
            RefSegment::MapKey(_) => Some(key.as_ref()),
            _ => None,
        },
        (PropertyKind::MultiType(types), RefSegment::TypedValue(t)) => types.get(t),
        _ => None,
    }
}

impl From<u32> for PropertyReference {
    fn from(index: u32) -> Self {
        PropertyReference::property(index)
    }
}

impl std::fmt::Display for RefSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefSegment::Property(index) => write!(f, "{index}"),
            RefSegment::ListItem(index) => write!(f, "@{index}"),
            RefSegment::SetItem(value) => write!(f, "${value}"),
            RefSegment::MapValue(key) => write!(f, ":{key}"),
            RefSegment::MapKey(key) => write!(f, "#{key}"),
            RefSegment::TypedValue(t) => write!(f, "&{t}"),
            RefSegment::AnyItem => write!(f, "*"),
        }
    }
}

impl std::fmt::Display for PropertyReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ScalarKind;

    fn model() -> DataModel {
        let address = DataModel::new("address")
            .property(1, PropertyDefinition::text("street"))
            .unwrap();
        DataModel::new("person")
            .property(1, PropertyDefinition::text("name"))
            .unwrap()
            .property(2, PropertyDefinition::embed("address", address))
            .unwrap()
            .property(3, PropertyDefinition::list("tags", PropertyDefinition::text("tag")))
            .unwrap()
            .property(
                4,
                PropertyDefinition::map(
                    "scores",
                    PropertyDefinition::text("subject"),
                    PropertyDefinition::uint("score"),
                ),
            )
            .unwrap()
            .property(
                5,
                PropertyDefinition::multi_type(
                    "contact",
                    [(1, PropertyDefinition::text("email")), (2, PropertyDefinition::int("phone"))],
                ),
            )
            .unwrap()
    }

    #[test]
    fn test_resolve_nested_field() {
        let model = model();
        let reference = PropertyReference::property(2).field(1);
        assert_eq!(reference.resolve(&model).unwrap().name, "street");
    }

    #[test]
    fn test_resolve_containers() {
        let model = model();
        let item = PropertyReference::property(3).item(0);
        assert_eq!(item.resolve(&model).unwrap().name, "tag");

        let value = PropertyReference::property(4).map_value("math");
        assert_eq!(value.resolve(&model).unwrap().scalar_kind(), Some(ScalarKind::UInt));

        let key = PropertyReference::property(4).map_key("math");
        assert_eq!(key.resolve(&model).unwrap().name, "subject");

        let typed = PropertyReference::property(5).typed(2);
        assert_eq!(typed.resolve(&model).unwrap().name, "phone");
    }

    #[test]
    fn test_mismatched_segment_rejected() {
        let model = model();
        let err = PropertyReference::property(1).item(0).resolve(&model).unwrap_err();
        assert!(matches!(err, Error::InvalidReference(_)));
        assert!(PropertyReference::property(9).resolve(&model).is_err());
        assert!(PropertyReference::property(5).typed(7).resolve(&model).is_err());
    }

    #[test]
    fn test_parent_and_fuzzy() {
        let reference = PropertyReference::property(3).any();
        assert!(reference.is_fuzzy());
        assert_eq!(reference.parent(), Some(PropertyReference::property(3)));
        assert_eq!(PropertyReference::property(3).parent(), None);
    }

    #[test]
    fn test_display() {
        let reference = PropertyReference::property(4).map_value("x");
        assert_eq!(reference.to_string(), "4.:\"x\"");
        assert_eq!(PropertyReference::property(3).item(2).to_string(), "3.@2");
    }
}
