//! Set, map, incrementing map and multi-type changes

use tessera_core::codec::qualifier::{keyed_item_qualifier, map_cursor_qualifier};
use tessera_core::codec::CellValue;
use tessera_core::validation::{validate_size, validate_value};
use tessera_core::{
    IncrementingMapAddition, IncrementingMapChange, MapChange, PropertyDefinition, PropertyKind,
    PropertyReference, SetChange, StoreError, StoreResult, ValidationViolation, Value,
};

use super::Processor;
use crate::reader::empty_value;

/// Kind mismatch of a key or item named for removal
fn check_kind(
    def: &PropertyDefinition,
    value: &Value,
    reference: PropertyReference,
    found: &mut Vec<ValidationViolation>,
) {
    let matches = def.scalar_kind().map_or(false, |kind| kind.matches(value));
    if !matches {
        found.push(ValidationViolation::InvalidType {
            reference,
            expected: def.kind.name().to_string(),
            actual: value.kind_name().to_string(),
        });
    }
}

impl<'m> Processor<'m> {
    pub(super) fn change_set(&mut self, change: &SetChange) -> StoreResult<()> {
        let reference = &change.reference;
        let path = self.resolve_target(reference)?;
        let def = path[path.len() - 1];
        let PropertyKind::Set(item_def) = &def.kind else {
            return Err(StoreError::request(format!(
                "{reference} is a {} property, not a set",
                def.kind.name()
            )));
        };

        let mut found = Vec::new();
        for item in &change.add_values {
            validate_value(item_def, item, &reference.clone().set_item(item.clone()), &mut found);
        }
        for item in &change.delete_values {
            check_kind(item_def, item, reference.clone().set_item(item.clone()), &mut found);
        }
        if !found.is_empty() {
            self.violations.extend(found);
            return Ok(());
        }

        let qualifier = self.qualifier(reference)?;
        let existed = self.is_live(&qualifier);
        let mut removed: Vec<Vec<u8>> = Vec::new();
        for item in &change.delete_values {
            if change.add_values.contains(item) {
                continue;
            }
            let item_q = keyed_item_qualifier(&qualifier, item)?;
            if self.is_live(&item_q) && !removed.contains(&item_q) {
                removed.push(item_q);
            }
        }
        let mut added: Vec<(Vec<u8>, &Value)> = Vec::new();
        for item in &change.add_values {
            let item_q = keyed_item_qualifier(&qualifier, item)?;
            if !self.is_live(&item_q) && !added.iter().any(|(q, _)| *q == item_q) {
                added.push((item_q, item));
            }
        }
        if existed && added.is_empty() && removed.is_empty() {
            return Ok(());
        }

        let count = (self.count(&qualifier, def)? + added.len() as u64)
            .saturating_sub(removed.len() as u64);
        if def.is_final && existed {
            found.push(ValidationViolation::Final {
                reference: reference.clone(),
            });
        }
        validate_size(def, count, reference, &mut found);
        if !found.is_empty() {
            self.violations.extend(found);
            return Ok(());
        }

        self.prepare_parents(reference, &path)?;
        for item_q in removed {
            self.row.tombstone(&item_q, self.version);
        }
        for (item_q, item) in added {
            self.put(item_q, CellValue::Scalar(item.clone()))?;
        }
        self.put(qualifier, CellValue::Count(count))?;
        if !existed {
            self.adjust_parent_count(reference, &path, true)?;
        }
        Ok(())
    }

    pub(super) fn change_map(&mut self, change: &MapChange) -> StoreResult<()> {
        let reference = &change.reference;
        let path = self.resolve_target(reference)?;
        let def = path[path.len() - 1];
        let (key_def, value_def) = match &def.kind {
            PropertyKind::Map { key, value } => (key, value),
            PropertyKind::IncrementingMap { key, value } if change.put.is_empty() => (key, value),
            PropertyKind::IncrementingMap { .. } => {
                return Err(StoreError::request(format!(
                    "keys of {reference} are assigned by the store; append values instead"
                )))
            }
            other => {
                return Err(StoreError::request(format!(
                    "{reference} is a {} property, not a map",
                    other.name()
                )))
            }
        };

        let mut found = Vec::new();
        for (key, value) in &change.put {
            validate_value(key_def, key, &reference.clone().map_key(key.clone()), &mut found);
            validate_value(value_def, value, &reference.clone().map_value(key.clone()), &mut found);
        }
        for key in &change.delete_keys {
            check_kind(key_def, key, reference.clone().map_key(key.clone()), &mut found);
        }
        if !found.is_empty() {
            self.violations.extend(found);
            return Ok(());
        }

        let qualifier = self.qualifier(reference)?;
        let existed = self.is_live(&qualifier);
        let mut removed: Vec<Vec<u8>> = Vec::new();
        for key in &change.delete_keys {
            if change.put.iter().any(|(k, _)| k == key) {
                continue;
            }
            let entry_q = keyed_item_qualifier(&qualifier, key)?;
            if self.is_live(&entry_q) && !removed.contains(&entry_q) {
                removed.push(entry_q);
            }
        }
        let mut written: Vec<(PropertyReference, &Value)> = Vec::new();
        let mut new_entries = 0u64;
        for (key, value) in &change.put {
            let entry = reference.clone().map_value(key.clone());
            if written.iter().any(|(r, _)| *r == entry) {
                continue;
            }
            let current = self.current_value(&entry)?;
            if current.as_ref() == Some(value) {
                continue;
            }
            if current.is_none() {
                new_entries += 1;
            }
            written.push((entry, value));
        }
        if existed && written.is_empty() && removed.is_empty() {
            return Ok(());
        }

        let count =
            (self.count(&qualifier, def)? + new_entries).saturating_sub(removed.len() as u64);
        if def.is_final && existed {
            found.push(ValidationViolation::Final {
                reference: reference.clone(),
            });
        }
        validate_size(def, count, reference, &mut found);
        if !found.is_empty() {
            self.violations.extend(found);
            return Ok(());
        }

        self.prepare_parents(reference, &path)?;
        for entry_q in removed {
            self.delete_subtree(&entry_q, None);
        }
        for (entry, value) in written {
            let entry_q = self.qualifier(&entry)?;
            let keep = Self::kept_cursor(&entry_q, value_def);
            self.delete_subtree(&entry_q, keep.as_deref());
            self.write_value(&entry, value_def, value)?;
        }
        self.put(qualifier, CellValue::Count(count))?;
        if !existed {
            self.adjust_parent_count(reference, &path, true)?;
        }
        Ok(())
    }

    /// Append values under keys following the map's cursor
    pub(super) fn append_to_map(
        &mut self,
        change: &IncrementingMapChange,
    ) -> StoreResult<Option<IncrementingMapAddition>> {
        let reference = &change.reference;
        let path = self.resolve_target(reference)?;
        let def = path[path.len() - 1];
        let PropertyKind::IncrementingMap {
            key: key_def,
            value: value_def,
        } = &def.kind
        else {
            return Err(StoreError::request(format!(
                "{reference} is a {} property, not an incrementing map",
                def.kind.name()
            )));
        };
        if change.add_values.is_empty() {
            return Ok(None);
        }

        let qualifier = self.qualifier(reference)?;
        let existed = self.is_live(&qualifier);
        let cursor = self.cursor(&qualifier, key_def)?;
        let keys: Vec<u64> = (1..=change.add_values.len() as u64)
            .map(|offset| cursor + offset)
            .collect();

        let mut found = Vec::new();
        for (key, value) in keys.iter().zip(&change.add_values) {
            let entry = reference.clone().map_value(Value::UInt(*key));
            validate_value(value_def, value, &entry, &mut found);
        }
        let count = self.count(&qualifier, def)? + keys.len() as u64;
        if def.is_final && existed {
            found.push(ValidationViolation::Final {
                reference: reference.clone(),
            });
        }
        validate_size(def, count, reference, &mut found);
        if !found.is_empty() {
            self.violations.extend(found);
            return Ok(None);
        }

        self.prepare_parents(reference, &path)?;
        for (key, value) in keys.iter().zip(&change.add_values) {
            let entry = reference.clone().map_value(Value::UInt(*key));
            self.write_value(&entry, value_def, value)?;
        }
        let last = keys.last().copied().unwrap_or(cursor);
        self.put(
            map_cursor_qualifier(&qualifier),
            CellValue::Scalar(Value::UInt(last)),
        )?;
        self.put(qualifier, CellValue::Count(count))?;
        if !existed {
            self.adjust_parent_count(reference, &path, true)?;
        }
        Ok(Some(IncrementingMapAddition {
            reference: reference.clone(),
            keys,
            values: change.add_values.clone(),
        }))
    }

    /// Switch a multi-type property to an empty value of a complex type
    pub(super) fn change_type(
        &mut self,
        reference: &PropertyReference,
        type_index: u32,
    ) -> StoreResult<()> {
        let path = self.resolve_target(reference)?;
        let def = path[path.len() - 1];
        let PropertyKind::MultiType(types) = &def.kind else {
            return Err(StoreError::request(format!(
                "{reference} is a {} property, not a multi-type",
                def.kind.name()
            )));
        };
        let typed = reference.clone().typed(type_index);
        let Some(type_def) = types.get(&type_index) else {
            self.violations.push(ValidationViolation::InvalidValue {
                reference: reference.clone(),
                reason: format!("unknown type {type_index}"),
            });
            return Ok(());
        };
        let Some(empty) = empty_value(type_def) else {
            self.violations.push(ValidationViolation::InvalidValue {
                reference: typed,
                reason: "scalar types are set with a value, not switched to".into(),
            });
            return Ok(());
        };

        let qualifier = self.qualifier(reference)?;
        if self.row.cell(&qualifier, def)? == Some(CellValue::ComplexTagged(type_index)) {
            return Ok(());
        }
        let mut found = Vec::new();
        if def.is_final && self.is_live(&qualifier) {
            found.push(ValidationViolation::Final {
                reference: reference.clone(),
            });
        }
        validate_value(type_def, &empty, &typed, &mut found);
        if !found.is_empty() {
            self.violations.extend(found);
            return Ok(());
        }

        self.prepare_parents(reference, &path)?;
        let existed = self.delete_subtree(&qualifier, None);
        self.put(qualifier, CellValue::ComplexTagged(type_index))?;
        self.write_value(&typed, type_def, &empty)?;
        if !existed {
            self.adjust_parent_count(reference, &path, true)?;
        }
        Ok(())
    }
}
