//! Row reconstruction
//!
//! Cells are visited in qualifier order, so a container or embed marker is
//! always seen before the cells below it. Each qualifier is decoded back
//! into a reference and its cell value is placed into the `Values` tree at
//! that path. Tombstones, meta qualifiers and incrementing map cursors are
//! skipped.

use tessera_core::codec::qualifier::{encode_qualifier, is_meta_qualifier};
use tessera_core::codec::{decode_qualifier, CellValue, TypeIndicator};
use tessera_core::{
    DataModel, DecodedQualifier, PropertyDefinition, PropertyKind, PropertyReference, RefSegment,
    StoreError, StoreResult, TypedValue, Value, Values,
};
use tracing::trace;

use crate::node::RowBuffer;

/// Rebuild the values of a row from `(qualifier, cell)` pairs in qualifier
/// order
pub fn build_values<'c, I>(model: &DataModel, cells: I) -> StoreResult<Values>
where
    I: IntoIterator<Item = (&'c [u8], &'c [u8])>,
{
    let mut values = Values::new();
    for (qualifier, cell) in cells {
        if is_meta_qualifier(qualifier) || cell.first() == Some(&(TypeIndicator::Tombstone as u8)) {
            continue;
        }
        let (reference, definition) = match decode_qualifier(model, qualifier)? {
            DecodedQualifier::Property {
                reference,
                definition,
            } => (reference, definition),
            DecodedQualifier::MapCursor { .. } => continue,
        };
        let Some(leaf) = leaf_value(CellValue::decode(cell, definition)?, definition) else {
            continue;
        };
        if !insert(&mut values, reference.segments(), leaf) {
            trace!(target: "tessera::store", %reference, "skipped cell without parent");
        }
    }
    Ok(values)
}

/// Value a single cell contributes to the tree
fn leaf_value(cell: CellValue, def: &PropertyDefinition) -> Option<Value> {
    match cell {
        CellValue::Tombstone => None,
        CellValue::Scalar(value) => Some(value),
        CellValue::Count(_) | CellValue::EmbedMarker => empty_value(def),
        CellValue::SimpleTagged { type_index, value } => {
            Some(Value::Typed(TypedValue::new(type_index, value)))
        }
        CellValue::ComplexTagged(type_index) => match &def.kind {
            PropertyKind::MultiType(types) => {
                let inner = types.get(&type_index).and_then(empty_value)?;
                Some(Value::Typed(TypedValue::new(type_index, inner)))
            }
            _ => None,
        },
    }
}

/// Empty value of a composite definition
pub(crate) fn empty_value(def: &PropertyDefinition) -> Option<Value> {
    match &def.kind {
        PropertyKind::List(_) => Some(Value::List(Vec::new())),
        PropertyKind::Set(_) => Some(Value::Set(Default::default())),
        PropertyKind::Map { .. } | PropertyKind::IncrementingMap { .. } => {
            Some(Value::Map(Default::default()))
        }
        PropertyKind::Embed(_) => Some(Value::Embed(Values::new())),
        PropertyKind::Scalar(_) | PropertyKind::MultiType(_) => None,
    }
}

fn insert(values: &mut Values, segments: &[RefSegment], leaf: Value) -> bool {
    match segments.split_first() {
        Some((RefSegment::Property(index), [])) => {
            values.insert(*index, leaf);
            true
        }
        Some((RefSegment::Property(index), rest)) => values
            .get_mut(*index)
            .map_or(false, |child| insert_below(child, rest, leaf)),
        _ => false,
    }
}

fn insert_below(target: &mut Value, segments: &[RefSegment], leaf: Value) -> bool {
    let Some((segment, rest)) = segments.split_first() else {
        return false;
    };
    match (target, segment) {
        (Value::Embed(values), RefSegment::Property(_)) => insert(values, segments, leaf),
        (Value::List(items), RefSegment::ListItem(index)) if rest.is_empty() => {
            let index = *index as usize;
            if index == items.len() {
                items.push(leaf);
            } else if let Some(slot) = items.get_mut(index) {
                *slot = leaf;
            } else {
                return false;
            }
            true
        }
        (Value::Set(items), RefSegment::SetItem(item)) if rest.is_empty() => {
            items.insert(item.clone());
            true
        }
        (Value::Map(entries), RefSegment::MapValue(key)) => {
            if rest.is_empty() {
                entries.insert(key.clone(), leaf);
                true
            } else {
                entries
                    .get_mut(key)
                    .map_or(false, |child| insert_below(child, rest, leaf))
            }
        }
        (Value::Typed(typed), RefSegment::TypedValue(type_index))
            if typed.type_index == *type_index =>
        {
            if rest.is_empty() {
                *typed.value = leaf;
                true
            } else {
                insert_below(&mut typed.value, rest, leaf)
            }
        }
        _ => false,
    }
}

/// Value at a concrete path in a values tree
pub fn lookup<'v>(values: &'v Values, segments: &[RefSegment]) -> Option<&'v Value> {
    let (first, rest) = segments.split_first()?;
    let RefSegment::Property(index) = first else {
        return None;
    };
    let mut current = values.get(*index)?;
    for segment in rest {
        current = match (current, segment) {
            (Value::Embed(values), RefSegment::Property(index)) => values.get(*index)?,
            (Value::List(items), RefSegment::ListItem(index)) => items.get(*index as usize)?,
            (Value::Set(items), RefSegment::SetItem(item)) => items.get(item)?,
            (Value::Map(entries), RefSegment::MapValue(key)) => entries.get(key)?,
            (Value::Map(entries), RefSegment::MapKey(key)) => entries.get_key_value(key)?.0,
            (Value::Typed(typed), RefSegment::TypedValue(type_index))
                if typed.type_index == *type_index =>
            {
                typed.value.as_ref()
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Rebuild every live value of a row
pub fn row_values(row: &RowBuffer, model: &DataModel) -> StoreResult<Values> {
    build_values(
        model,
        row.iter()
            .filter_map(|(qualifier, node)| node.live_cell().map(|cell| (qualifier, cell))),
    )
}

/// Current value at a concrete reference
///
/// Rebuilds the subtree of the top-level property the reference starts in
/// and walks it down to the addressed value.
pub fn value_at(
    row: &RowBuffer,
    model: &DataModel,
    reference: &PropertyReference,
) -> StoreResult<Option<Value>> {
    let Some(RefSegment::Property(top)) = reference.segments().first() else {
        return Err(StoreError::request(format!(
            "{reference} does not start with a property"
        )));
    };
    if reference.is_fuzzy() {
        return Err(StoreError::request(format!(
            "{reference} matches several values"
        )));
    }
    let prefix = encode_qualifier(&PropertyReference::property(*top), model)?;
    let values = build_values(
        model,
        row.prefixed(&prefix)
            .filter_map(|(qualifier, node)| node.live_cell().map(|cell| (qualifier, cell))),
    )?;
    Ok(lookup(&values, reference.segments()).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};
    use tessera_core::codec::qualifier::{
        keyed_item_qualifier, list_item_qualifier, SOFT_DELETE_QUALIFIER,
    };
    use tessera_core::Version;

    fn model() -> DataModel {
        let address = DataModel::new("address")
            .property(1, PropertyDefinition::text("street"))
            .unwrap();
        DataModel::new("person")
            .property(1, PropertyDefinition::text("name"))
            .unwrap()
            .property(2, PropertyDefinition::list("tags", PropertyDefinition::text("t")))
            .unwrap()
            .property(3, PropertyDefinition::set("codes", PropertyDefinition::uint("c")))
            .unwrap()
            .property(
                4,
                PropertyDefinition::map(
                    "notes",
                    PropertyDefinition::text("k"),
                    PropertyDefinition::text("v"),
                ),
            )
            .unwrap()
            .property(5, PropertyDefinition::embed("home", address))
            .unwrap()
    }

    fn q(model: &DataModel, reference: PropertyReference) -> Vec<u8> {
        encode_qualifier(&reference, model).unwrap()
    }

    fn row(model: &DataModel) -> RowBuffer {
        let v = Version::new(1, 0);
        let mut row = RowBuffer::new(false);
        let put = |row: &mut RowBuffer, q: Vec<u8>, cell: CellValue| row.put(q, &cell, v).unwrap();

        put(&mut row, SOFT_DELETE_QUALIFIER.to_vec(), CellValue::Scalar(Value::Bool(false)));
        put(&mut row, q(model, 1u32.into()), CellValue::Scalar("ada".into()));
        let tags = q(model, 2u32.into());
        put(&mut row, tags.clone(), CellValue::Count(2));
        put(&mut row, list_item_qualifier(&tags, 0), CellValue::Scalar("a".into()));
        put(&mut row, list_item_qualifier(&tags, 1), CellValue::Scalar("b".into()));
        let codes = q(model, 3u32.into());
        put(&mut row, codes.clone(), CellValue::Count(1));
        put(
            &mut row,
            keyed_item_qualifier(&codes, &Value::UInt(7)).unwrap(),
            CellValue::Scalar(Value::UInt(7)),
        );
        let notes = q(model, 4u32.into());
        put(&mut row, notes.clone(), CellValue::Count(1));
        put(
            &mut row,
            keyed_item_qualifier(&notes, &"k".into()).unwrap(),
            CellValue::Scalar("v".into()),
        );
        put(&mut row, q(model, 5u32.into()), CellValue::EmbedMarker);
        put(
            &mut row,
            q(model, PropertyReference::property(5).field(1)),
            CellValue::Scalar("main".into()),
        );
        row
    }

    #[test]
    fn test_row_values() {
        let model = model();
        let values = row_values(&row(&model), &model).unwrap();
        assert_eq!(values.get(1), Some(&Value::Text("ada".into())));
        assert_eq!(
            values.get(2),
            Some(&Value::List(vec!["a".into(), "b".into()]))
        );
        assert_eq!(
            values.get(3),
            Some(&Value::Set(BTreeSet::from([Value::UInt(7)])))
        );
        assert_eq!(
            values.get(4),
            Some(&Value::Map(BTreeMap::from([("k".into(), "v".into())])))
        );
        assert_eq!(
            values.get(5),
            Some(&Value::Embed(Values::new().with(1, "main")))
        );
    }

    #[test]
    fn test_tombstones_are_skipped() {
        let model = model();
        let mut row = row(&model);
        let tags = q(&model, 2u32.into());
        row.tombstone(&list_item_qualifier(&tags, 1), Version::new(2, 0));
        row.put(tags, &CellValue::Count(1), Version::new(2, 0)).unwrap();
        let values = row_values(&row, &model).unwrap();
        assert_eq!(values.get(2), Some(&Value::List(vec!["a".into()])));
    }

    #[test]
    fn test_value_at() {
        let model = model();
        let row = row(&model);
        let street = PropertyReference::property(5).field(1);
        assert_eq!(
            value_at(&row, &model, &street).unwrap(),
            Some(Value::Text("main".into()))
        );
        let item = PropertyReference::property(2).item(1);
        assert_eq!(value_at(&row, &model, &item).unwrap(), Some("b".into()));
        let missing = PropertyReference::property(4).map_value("x");
        assert_eq!(value_at(&row, &model, &missing).unwrap(), None);
        assert!(value_at(&row, &model, &PropertyReference::property(2).any()).is_err());
    }

    #[test]
    fn test_orphan_cells_are_ignored() {
        let model = model();
        let mut row = RowBuffer::new(false);
        row.put(
            q(&model, PropertyReference::property(5).field(1)),
            &CellValue::Scalar("lost".into()),
            Version::new(1, 0),
        )
        .unwrap();
        assert!(row_values(&row, &model).unwrap().is_empty());
    }
}
