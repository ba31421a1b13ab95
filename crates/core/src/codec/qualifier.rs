//! Qualifier encoding
//!
//! A qualifier addresses one cell within a row. It is the concatenation of
//! one suffix per reference segment:
//!
//! | Segment          | Suffix                                  |
//! |------------------|-----------------------------------------|
//! | property         | varint(index << 3 \| storage tag)       |
//! | list item        | 4 byte BE item index                    |
//! | set item         | varint(len) ++ scalar bytes of the item |
//! | map value or key | varint(len) ++ scalar bytes of the key  |
//! | multi-type type  | varint(type index << 3 \| storage tag)  |
//!
//! Qualifiers of a container's children share the container's qualifier as
//! prefix, so a range scan over that prefix visits the whole subtree.
//!
//! Qualifiers starting with a byte below 9 are row metadata: property
//! indexes start at 1 so no property segment encodes below `1 << 3`.

use super::scalar::{check_kind, read_scalar, scalar_len, write_scalar};
use super::{encode_exact, take, ByteSink, LengthCounter, SliceWriter, WildcardWidth};
use crate::definition::{DataModel, PropertyDefinition, PropertyKind, ScalarKind, StorageTag};
use crate::error::{Error, Result};
use crate::reference::{child_definition, PropertyReference, RefSegment};
use crate::value::Value;
use crate::varint::read_varint;
use byteorder::{BigEndian, ByteOrder};

/// Meta qualifier of the soft-delete flag
pub const SOFT_DELETE_QUALIFIER: [u8; 1] = [0x00];

/// Meta qualifier of the row's last version
pub const LAST_VERSION_QUALIFIER: [u8; 1] = [0x01];

/// Length of a list item suffix
pub const LIST_INDEX_SIZE: usize = 4;

const FIRST_PROPERTY_BYTE: u8 = 1 << 3;

/// Whether a qualifier holds row metadata rather than a property
pub fn is_meta_qualifier(qualifier: &[u8]) -> bool {
    qualifier.first().map_or(false, |b| *b < FIRST_PROPERTY_BYTE)
}

/// Qualifier of the key cursor of an incrementing map
pub fn map_cursor_qualifier(map_qualifier: &[u8]) -> Vec<u8> {
    let mut qualifier = Vec::with_capacity(map_qualifier.len() + 1);
    qualifier.extend_from_slice(map_qualifier);
    qualifier.push(0x00);
    qualifier
}

/// Qualifier of a list item below `list_qualifier`
pub fn list_item_qualifier(list_qualifier: &[u8], index: u32) -> Vec<u8> {
    let mut qualifier = Vec::with_capacity(list_qualifier.len() + LIST_INDEX_SIZE);
    qualifier.extend_from_slice(list_qualifier);
    qualifier.extend_from_slice(&index.to_be_bytes());
    qualifier
}

/// Qualifier of a set item or map entry below `container_qualifier`
pub fn keyed_item_qualifier(container_qualifier: &[u8], key: &Value) -> Result<Vec<u8>> {
    encode_exact(|sink| {
        sink.put(container_qualifier);
        write_keyed_suffix(key, sink)
    })
}

fn write_keyed_suffix(key: &Value, sink: &mut dyn ByteSink) -> Result<()> {
    sink.put_varint(scalar_len(key)? as u64);
    write_scalar(key, sink)
}

fn segment_header(index: u32, tag: StorageTag) -> u64 {
    (u64::from(index) << 3) | tag as u64
}

/// Shared traversal of the length and write passes
fn walk(reference: &PropertyReference, model: &DataModel, sink: &mut dyn ByteSink) -> Result<()> {
    let mut parent: Option<&PropertyDefinition> = None;
    for segment in reference.segments() {
        let def = match parent {
            None => match segment {
                RefSegment::Property(index) => model.get(*index),
                _ => None,
            },
            Some(parent) => child_definition(parent, segment),
        }
        .ok_or_else(|| {
            Error::InvalidReference(format!(
                "{reference} does not resolve in model '{}'",
                model.name
            ))
        })?;

        match segment {
            RefSegment::Property(index) => {
                sink.put_varint(segment_header(*index, def.kind.storage_tag()));
            }
            RefSegment::TypedValue(type_index) => {
                sink.put_varint(segment_header(*type_index, def.kind.storage_tag()));
            }
            RefSegment::ListItem(index) => sink.put(&index.to_be_bytes()),
            RefSegment::SetItem(key) | RefSegment::MapValue(key) | RefSegment::MapKey(key) => {
                let kind = parent.and_then(key_kind).ok_or_else(|| {
                    Error::InvalidReference(format!("{reference} has a key on a non keyed property"))
                })?;
                check_kind(kind, key).map_err(|e| {
                    Error::InvalidReference(format!("key in {reference}: {e}"))
                })?;
                write_keyed_suffix(key, sink)?;
            }
            RefSegment::AnyItem => {
                let width = match parent.map(|p| &p.kind) {
                    Some(PropertyKind::List(_)) => WildcardWidth::Fixed(LIST_INDEX_SIZE),
                    _ => WildcardWidth::LengthPrefixed,
                };
                sink.wildcard(width)?;
            }
        }
        parent = Some(def);
    }
    if parent.is_none() {
        return Err(Error::InvalidReference("empty reference".into()));
    }
    Ok(())
}

fn key_kind(container: &PropertyDefinition) -> Option<ScalarKind> {
    match &container.kind {
        PropertyKind::Set(item) => item.scalar_kind(),
        PropertyKind::Map { key, .. } | PropertyKind::IncrementingMap { key, .. } => {
            key.scalar_kind()
        }
        _ => None,
    }
}

/// Length of the qualifier of `reference`
pub fn qualifier_len(reference: &PropertyReference, model: &DataModel) -> Result<usize> {
    let mut counter = LengthCounter::default();
    walk(reference, model, &mut counter)?;
    Ok(counter.len())
}

/// Write the qualifier of `reference` into `buf`, which must be exactly
/// `qualifier_len` bytes long
pub fn write_qualifier(
    reference: &PropertyReference,
    model: &DataModel,
    buf: &mut [u8],
) -> Result<usize> {
    let mut writer = SliceWriter::new(buf);
    walk(reference, model, &mut writer)?;
    writer.finish()
}

/// Qualifier bytes of a concrete reference
pub fn encode_qualifier(reference: &PropertyReference, model: &DataModel) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; qualifier_len(reference, model)?];
    write_qualifier(reference, model, &mut buf)?;
    Ok(buf)
}

/// Piece of a qualifier pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualifierPart {
    /// Bytes that must match exactly
    Exact(Vec<u8>),
    /// Any suffix of the given width
    Any(WildcardWidth),
}

#[derive(Default)]
struct PartCollector {
    parts: Vec<QualifierPart>,
    pending: Vec<u8>,
}

impl PartCollector {
    fn flush(&mut self) {
        if !self.pending.is_empty() {
            self.parts.push(QualifierPart::Exact(std::mem::take(&mut self.pending)));
        }
    }

    fn finish(mut self) -> Vec<QualifierPart> {
        self.flush();
        self.parts
    }
}

impl ByteSink for PartCollector {
    fn put(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    fn put_varint(&mut self, value: u64) {
        crate::varint::push_varint(&mut self.pending, value);
    }

    fn wildcard(&mut self, width: WildcardWidth) -> Result<()> {
        self.flush();
        self.parts.push(QualifierPart::Any(width));
        Ok(())
    }
}

/// Pattern of a possibly fuzzy reference
///
/// Consecutive concrete segments are merged into one `Exact` part.
pub fn qualifier_parts(reference: &PropertyReference, model: &DataModel) -> Result<Vec<QualifierPart>> {
    let mut collector = PartCollector::default();
    walk(reference, model, &mut collector)?;
    Ok(collector.finish())
}

/// Result of decoding a stored qualifier
#[derive(Debug, Clone)]
pub enum DecodedQualifier<'m> {
    /// A property value cell
    Property {
        /// Reference of the cell
        reference: PropertyReference,
        /// Definition of the addressed value
        definition: &'m PropertyDefinition,
    },
    /// Key cursor of an incrementing map
    MapCursor {
        /// Reference of the map
        reference: PropertyReference,
    },
}

/// Decode qualifier bytes back into a reference
///
/// Map entries decode as `MapValue` segments. Meta qualifiers must be
/// filtered with `is_meta_qualifier` first.
pub fn decode_qualifier<'m>(model: &'m DataModel, bytes: &[u8]) -> Result<DecodedQualifier<'m>> {
    let mut segments = Vec::new();
    let mut parent: Option<&'m PropertyDefinition> = None;
    let mut pos = 0;

    while pos < bytes.len() {
        let (segment, def) = match parent {
            None => property_segment(model, bytes, &mut pos)?,
            Some(current) => match &current.kind {
                PropertyKind::Embed(inner) => property_segment(inner, bytes, &mut pos)?,
                PropertyKind::Scalar(_) => {
                    return Err(Error::Corruption(format!(
                        "bytes after scalar property '{}'",
                        current.name
                    )))
                }
                PropertyKind::List(item) => {
                    let index = BigEndian::read_u32(take(bytes, &mut pos, LIST_INDEX_SIZE)?);
                    (RefSegment::ListItem(index), item.as_ref())
                }
                PropertyKind::Set(item) => {
                    let value = keyed_suffix(item, bytes, &mut pos)?;
                    (RefSegment::SetItem(value), item.as_ref())
                }
                PropertyKind::Map { key, value } => {
                    let k = keyed_suffix(key, bytes, &mut pos)?;
                    (RefSegment::MapValue(k), value.as_ref())
                }
                PropertyKind::IncrementingMap { key, value } => {
                    if bytes[pos..] == [0x00] {
                        return Ok(DecodedQualifier::MapCursor {
                            reference: PropertyReference::from_segments(segments),
                        });
                    }
                    let k = keyed_suffix(key, bytes, &mut pos)?;
                    (RefSegment::MapValue(k), value.as_ref())
                }
                PropertyKind::MultiType(types) => {
                    let (header, used) = read_varint(&bytes[pos..])?;
                    pos += used;
                    let type_index = u32::try_from(header >> 3)
                        .map_err(|_| Error::Decode(format!("type index {} too large", header >> 3)))?;
                    let def = types.get(&type_index).ok_or_else(|| {
                        Error::Corruption(format!("unknown type {type_index} in '{}'", current.name))
                    })?;
                    check_tag(def, header)?;
                    (RefSegment::TypedValue(type_index), def)
                }
            },
        };
        segments.push(segment);
        parent = Some(def);
    }

    match parent {
        Some(definition) => Ok(DecodedQualifier::Property {
            reference: PropertyReference::from_segments(segments),
            definition,
        }),
        None => Err(Error::Decode("empty qualifier".into())),
    }
}

fn property_segment<'m>(
    model: &'m DataModel,
    bytes: &[u8],
    pos: &mut usize,
) -> Result<(RefSegment, &'m PropertyDefinition)> {
    let (header, used) = read_varint(&bytes[*pos..])?;
    *pos += used;
    let index = u32::try_from(header >> 3)
        .map_err(|_| Error::Decode(format!("property index {} too large", header >> 3)))?;
    let def = model.get(index).ok_or_else(|| {
        Error::Corruption(format!("unknown property {index} in model '{}'", model.name))
    })?;
    check_tag(def, header)?;
    Ok((RefSegment::Property(index), def))
}

fn check_tag(def: &PropertyDefinition, header: u64) -> Result<()> {
    let tag = (header & 0x07) as u8;
    if StorageTag::from_bits(tag) == Some(def.kind.storage_tag()) {
        Ok(())
    } else {
        Err(Error::Corruption(format!(
            "storage tag {tag} does not match {} property '{}'",
            def.kind.name(),
            def.name
        )))
    }
}

fn keyed_suffix(def: &PropertyDefinition, bytes: &[u8], pos: &mut usize) -> Result<Value> {
    let kind = def
        .scalar_kind()
        .ok_or_else(|| Error::Corruption(format!("non scalar key '{}'", def.name)))?;
    let (len, used) = read_varint(&bytes[*pos..])?;
    *pos += used;
    let len = usize::try_from(len).map_err(|_| Error::Decode(format!("key length {len}")))?;
    read_scalar(kind, take(bytes, pos, len)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn model() -> DataModel {
        let address = DataModel::new("address")
            .property(1, PropertyDefinition::text("street"))
            .unwrap()
            .property(2, PropertyDefinition::uint("number"))
            .unwrap();
        DataModel::new("person")
            .property(1, PropertyDefinition::text("name"))
            .unwrap()
            .property(2, PropertyDefinition::embed("address", address))
            .unwrap()
            .property(3, PropertyDefinition::list("tags", PropertyDefinition::text("tag")))
            .unwrap()
            .property(4, PropertyDefinition::set("lucky", PropertyDefinition::int("n")))
            .unwrap()
            .property(
                5,
                PropertyDefinition::map(
                    "scores",
                    PropertyDefinition::text("subject"),
                    PropertyDefinition::uint("score"),
                ),
            )
            .unwrap()
            .property(
                6,
                PropertyDefinition::incrementing_map("log", PropertyDefinition::text("entry")),
            )
            .unwrap()
            .property(
                7,
                PropertyDefinition::multi_type(
                    "contact",
                    [
                        (1, PropertyDefinition::text("email")),
                        (2, PropertyDefinition::list("phones", PropertyDefinition::text("p"))),
                    ],
                ),
            )
            .unwrap()
            .property(200, PropertyDefinition::boolean("far"))
            .unwrap()
    }

    fn decode_reference(model: &DataModel, bytes: &[u8]) -> PropertyReference {
        match decode_qualifier(model, bytes).unwrap() {
            DecodedQualifier::Property { reference, .. } => reference,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_property_segment_bytes() {
        let model = model();
        let q = encode_qualifier(&PropertyReference::property(1), &model).unwrap();
        assert_eq!(q, vec![(1u8 << 3) | 1]);
        let q = encode_qualifier(&PropertyReference::property(3), &model).unwrap();
        assert_eq!(q, vec![(3u8 << 3) | 3]);
        assert!(!is_meta_qualifier(&q));
        assert!(is_meta_qualifier(&SOFT_DELETE_QUALIFIER));
        assert!(is_meta_qualifier(&LAST_VERSION_QUALIFIER));
    }

    #[test]
    fn test_length_then_write_agree() {
        let model = model();
        let reference = PropertyReference::property(2).field(2);
        let len = qualifier_len(&reference, &model).unwrap();
        let mut buf = vec![0u8; len];
        assert_eq!(write_qualifier(&reference, &model, &mut buf).unwrap(), len);
        assert_eq!(buf, vec![(2u8 << 3) | 2, (2 << 3) | 1]);

        let mut short = vec![0u8; len + 1];
        assert!(write_qualifier(&reference, &model, &mut short).is_err());
    }

    #[test]
    fn test_container_suffixes() {
        let model = model();
        let item = encode_qualifier(&PropertyReference::property(3).item(2), &model).unwrap();
        assert_eq!(item, vec![(3u8 << 3) | 3, 0, 0, 0, 2]);
        assert_eq!(item, list_item_qualifier(&[(3 << 3) | 3], 2));

        let entry = encode_qualifier(&PropertyReference::property(5).map_value("math"), &model).unwrap();
        let mut expected = vec![(5u8 << 3) | 5, 4];
        expected.extend_from_slice(b"math");
        assert_eq!(entry, expected);

        let key = encode_qualifier(&PropertyReference::property(5).map_key("math"), &model).unwrap();
        assert_eq!(key, entry);
        assert_eq!(
            keyed_item_qualifier(&[(5 << 3) | 5], &Value::Text("math".into())).unwrap(),
            entry
        );
    }

    #[test]
    fn test_children_share_parent_prefix() {
        let model = model();
        let parent = encode_qualifier(&PropertyReference::property(2), &model).unwrap();
        let child = encode_qualifier(&PropertyReference::property(2).field(1), &model).unwrap();
        assert!(child.starts_with(&parent));
    }

    #[test]
    fn test_decode_roundtrip_of_each_reference_kind() {
        let model = model();
        let references = [
            PropertyReference::property(1),
            PropertyReference::property(2).field(1),
            PropertyReference::property(3).item(7),
            PropertyReference::property(4).set_item(-3i64),
            PropertyReference::property(5).map_value("math"),
            PropertyReference::property(6).map_value(3u64),
            PropertyReference::property(7).typed(2).item(0),
            PropertyReference::property(200),
        ];
        for reference in references {
            let bytes = encode_qualifier(&reference, &model).unwrap();
            assert_eq!(decode_reference(&model, &bytes), reference);
        }
    }

    #[test]
    fn test_map_cursor_decodes_as_cursor() {
        let model = model();
        let map = encode_qualifier(&PropertyReference::property(6), &model).unwrap();
        let cursor = map_cursor_qualifier(&map);
        match decode_qualifier(&model, &cursor).unwrap() {
            DecodedQualifier::MapCursor { reference } => {
                assert_eq!(reference, PropertyReference::property(6))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_wrong_key_kind_is_invalid_reference() {
        let model = model();
        let err = encode_qualifier(&PropertyReference::property(5).map_value(1u64), &model).unwrap_err();
        assert!(matches!(err, Error::InvalidReference(_)));
    }

    #[test]
    fn test_wildcards() {
        let model = model();
        let fuzzy = PropertyReference::property(3).any();
        assert!(encode_qualifier(&fuzzy, &model).is_err());
        let parts = qualifier_parts(&fuzzy, &model).unwrap();
        assert_eq!(
            parts,
            vec![
                QualifierPart::Exact(vec![(3u8 << 3) | 3]),
                QualifierPart::Any(WildcardWidth::Fixed(LIST_INDEX_SIZE)),
            ]
        );
        let parts = qualifier_parts(&PropertyReference::property(5).any(), &model).unwrap();
        assert_eq!(parts[1], QualifierPart::Any(WildcardWidth::LengthPrefixed));
    }

    #[test]
    fn test_corrupt_qualifiers_rejected() {
        let model = model();
        // unknown property
        assert!(decode_qualifier(&model, &[(9 << 3) | 1]).is_err());
        // tag disagrees with definition
        assert!(decode_qualifier(&model, &[(1 << 3) | 3]).is_err());
        // truncated list index
        assert!(decode_qualifier(&model, &[(3 << 3) | 3, 0, 0]).is_err());
        // trailing bytes after scalar
        assert!(decode_qualifier(&model, &[(1 << 3) | 1, 5]).is_err());
    }

    proptest! {
        #[test]
        fn prop_list_qualifiers_sort_by_index(a in any::<u32>(), b in any::<u32>()) {
            let model = model();
            let qa = encode_qualifier(&PropertyReference::property(3).item(a), &model).unwrap();
            let qb = encode_qualifier(&PropertyReference::property(3).item(b), &model).unwrap();
            prop_assert_eq!(a.cmp(&b), qa.cmp(&qb));
        }
    }
}
