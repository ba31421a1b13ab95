//! Secondary index expressions
//!
//! An `Indexable` describes how to derive index bytes from a row. It has two
//! byte forms:
//!
//! - The index reference identifies the index itself and prefixes every
//!   entry: `[1] ++ qualifier`, `[2] ++ qualifier` for a reversed reference,
//!   or `[3] ++ varint(parts) ++ (varint(len) ++ part reference)*`.
//! - The index value is derived from the row: scalar bytes, their bit
//!   inversion when reversed, or for `Multiple` the part values
//!   concatenated and followed by each part's varint length.
//!
//! When any referenced property is absent the row is not indexable and has
//! no entry.

use crate::codec::qualifier::{qualifier_len, write_qualifier};
use crate::codec::scalar::scalar_bytes;
use crate::codec::{encode_exact, ByteSink};
use crate::definition::DataModel;
use crate::error::{Error, Result};
use crate::reference::{PropertyReference, RefSegment};
use crate::value::Value;
use crate::varint::push_varint;

const REFERENCE_TAG: u8 = 1;
const REVERSED_TAG: u8 = 2;
const MULTIPLE_TAG: u8 = 3;

/// Index expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indexable {
    /// Value of one property
    Reference(PropertyReference),
    /// Value of one property, bit-inverted for descending order
    Reversed(PropertyReference),
    /// Composite of several parts
    Multiple(Vec<Indexable>),
}

impl Indexable {
    /// Check the expression against a model
    ///
    /// References must resolve to scalar properties through plain or
    /// embedded properties and multi-type payloads only.
    pub fn validate(&self, model: &DataModel) -> Result<()> {
        match self {
            Indexable::Reference(reference) | Indexable::Reversed(reference) => {
                let concrete = reference
                    .segments()
                    .iter()
                    .all(|s| matches!(s, RefSegment::Property(_) | RefSegment::TypedValue(_)));
                if !concrete {
                    return Err(Error::InvalidDefinition(format!(
                        "index on {reference} passes through a container"
                    )));
                }
                let def = reference.resolve(model).map_err(|e| {
                    Error::InvalidDefinition(format!("index on {reference}: {e}"))
                })?;
                if def.scalar_kind().is_none() {
                    return Err(Error::InvalidDefinition(format!(
                        "index on {reference} must target a scalar, not {}",
                        def.kind.name()
                    )));
                }
                Ok(())
            }
            Indexable::Multiple(parts) => {
                if parts.is_empty() {
                    return Err(Error::InvalidDefinition("empty composite index".into()));
                }
                for part in parts {
                    if matches!(part, Indexable::Multiple(_)) {
                        return Err(Error::InvalidDefinition(
                            "composite index parts cannot be composite".into(),
                        ));
                    }
                    part.validate(model)?;
                }
                Ok(())
            }
        }
    }

    /// References read to compute the index value
    pub fn references(&self) -> Vec<&PropertyReference> {
        match self {
            Indexable::Reference(reference) | Indexable::Reversed(reference) => vec![reference],
            Indexable::Multiple(parts) => parts.iter().flat_map(Indexable::references).collect(),
        }
    }

    fn write_reference(&self, model: &DataModel, sink: &mut dyn ByteSink) -> Result<()> {
        match self {
            Indexable::Reference(reference) | Indexable::Reversed(reference) => {
                let tag = if matches!(self, Indexable::Reversed(_)) {
                    REVERSED_TAG
                } else {
                    REFERENCE_TAG
                };
                sink.put_u8(tag);
                let mut qualifier = vec![0u8; qualifier_len(reference, model)?];
                write_qualifier(reference, model, &mut qualifier)?;
                sink.put(&qualifier);
                Ok(())
            }
            Indexable::Multiple(parts) => {
                sink.put_u8(MULTIPLE_TAG);
                sink.put_varint(parts.len() as u64);
                for part in parts {
                    let bytes = part.reference_bytes(model)?;
                    sink.put_varint(bytes.len() as u64);
                    sink.put(&bytes);
                }
                Ok(())
            }
        }
    }

    /// Bytes identifying this index
    pub fn reference_bytes(&self, model: &DataModel) -> Result<Vec<u8>> {
        encode_exact(|sink| self.write_reference(model, sink))
    }

    /// Index value of a row, `None` when not indexable
    ///
    /// `lookup` returns the current value at a reference.
    pub fn index_value<F, E>(&self, lookup: &mut F) -> std::result::Result<Option<Vec<u8>>, E>
    where
        F: FnMut(&PropertyReference) -> std::result::Result<Option<Value>, E>,
        E: From<Error>,
    {
        match self {
            Indexable::Reference(reference) => match lookup(reference)? {
                Some(value) => Ok(Some(scalar_bytes(&value)?)),
                None => Ok(None),
            },
            Indexable::Reversed(reference) => match lookup(reference)? {
                Some(value) => {
                    let mut bytes = scalar_bytes(&value)?;
                    bytes.iter_mut().for_each(|b| *b = !*b);
                    Ok(Some(bytes))
                }
                None => Ok(None),
            },
            Indexable::Multiple(parts) => {
                let mut values = Vec::with_capacity(parts.len());
                for part in parts {
                    match part.index_value(lookup)? {
                        Some(bytes) => values.push(bytes),
                        None => return Ok(None),
                    }
                }
                let mut out: Vec<u8> = values.concat();
                for value in &values {
                    push_varint(&mut out, value.len() as u64);
                }
                Ok(Some(out))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::PropertyDefinition;
    use crate::value::Values;

    fn model() -> DataModel {
        DataModel::new("person")
            .property(1, PropertyDefinition::text("name"))
            .unwrap()
            .property(2, PropertyDefinition::uint("age"))
            .unwrap()
            .property(3, PropertyDefinition::list("tags", PropertyDefinition::text("t")))
            .unwrap()
    }

    fn lookup_in(values: &Values) -> impl FnMut(&PropertyReference) -> Result<Option<Value>> + '_ {
        move |reference| match reference.segments() {
            [RefSegment::Property(index)] => Ok(values.get(*index).cloned()),
            _ => Ok(None),
        }
    }

    #[test]
    fn test_validate() {
        let model = model();
        assert!(Indexable::Reference(PropertyReference::property(1)).validate(&model).is_ok());
        assert!(Indexable::Reference(PropertyReference::property(3)).validate(&model).is_err());
        assert!(Indexable::Reference(PropertyReference::property(3).item(0))
            .validate(&model)
            .is_err());
        assert!(Indexable::Multiple(vec![]).validate(&model).is_err());
        assert!(Indexable::Multiple(vec![Indexable::Multiple(vec![Indexable::Reference(
            PropertyReference::property(1)
        )])])
        .validate(&model)
        .is_err());
    }

    #[test]
    fn test_reference_bytes() {
        let model = model();
        let simple = Indexable::Reference(PropertyReference::property(2));
        assert_eq!(simple.reference_bytes(&model).unwrap(), vec![1, (2 << 3) | 1]);
        let reversed = Indexable::Reversed(PropertyReference::property(2));
        assert_eq!(reversed.reference_bytes(&model).unwrap(), vec![2, (2 << 3) | 1]);
        let multiple = Indexable::Multiple(vec![simple, reversed]);
        assert_eq!(
            multiple.reference_bytes(&model).unwrap(),
            vec![3, 2, 2, 1, (2 << 3) | 1, 2, 2, (2 << 3) | 1]
        );
    }

    #[test]
    fn test_values() {
        let values = Values::new().with(1, "ab").with(2, 7u64);
        let mut lookup = lookup_in(&values);

        let name = Indexable::Reference(PropertyReference::property(1));
        assert_eq!(name.index_value(&mut lookup).unwrap(), Some(b"ab".to_vec()));

        let reversed = Indexable::Reversed(PropertyReference::property(1));
        assert_eq!(
            reversed.index_value(&mut lookup).unwrap(),
            Some(vec![!b'a', !b'b'])
        );

        let multiple = Indexable::Multiple(vec![
            Indexable::Reference(PropertyReference::property(1)),
            Indexable::Reference(PropertyReference::property(2)),
        ]);
        let bytes = multiple.index_value(&mut lookup).unwrap().unwrap();
        assert_eq!(&bytes[..2], b"ab");
        assert_eq!(&bytes[bytes.len() - 2..], &[2, 8]);
    }

    #[test]
    fn test_absent_input_is_not_indexable() {
        let values = Values::new().with(1, "ab");
        let mut lookup = lookup_in(&values);
        let multiple = Indexable::Multiple(vec![
            Indexable::Reference(PropertyReference::property(1)),
            Indexable::Reference(PropertyReference::property(2)),
        ]);
        assert_eq!(multiple.index_value(&mut lookup).unwrap(), None);
    }
}
