//! Check, set and delete of single values

use tessera_core::codec::qualifier::{keyed_item_qualifier, list_item_qualifier, map_cursor_qualifier};
use tessera_core::codec::CellValue;
use tessera_core::validation::validate_value;
use tessera_core::{
    PropertyDefinition, PropertyKind, PropertyReference, RefSegment, StoreError, StoreResult,
    TypedValue, ValidationViolation, Value,
};

use super::Processor;

impl<'m> Processor<'m> {
    pub(super) fn check(
        &mut self,
        reference: &PropertyReference,
        expected: &Value,
    ) -> StoreResult<()> {
        let actual = self.current_value(reference)?;
        if actual.as_ref() != Some(expected) {
            self.violations.push(ValidationViolation::CheckFailed {
                reference: reference.clone(),
                expected: expected.clone(),
                actual,
            });
        }
        Ok(())
    }

    pub(super) fn set_value(
        &mut self,
        reference: &PropertyReference,
        value: &Value,
    ) -> StoreResult<()> {
        let path = self.resolve_target(reference)?;
        let def = path[path.len() - 1];
        match reference.last() {
            Some(RefSegment::SetItem(_)) => {
                return Err(StoreError::request(format!(
                    "{reference} is a set item; use a set change to add it"
                )))
            }
            // Scalar payloads live in the multi-type cell itself
            Some(RefSegment::TypedValue(type_index)) if def.scalar_kind().is_some() => {
                let Some(parent) = reference.parent() else {
                    return Err(StoreError::request(format!("{reference} has no parent")));
                };
                let typed = Value::Typed(TypedValue::new(*type_index, value.clone()));
                return self.set_value(&parent, &typed);
            }
            _ => {}
        }

        let current = self.current_value(reference)?;
        let mut found = Vec::new();
        if def.is_final && current.as_ref().map_or(false, |c| c != value) {
            found.push(ValidationViolation::Final {
                reference: reference.clone(),
            });
        }
        validate_value(def, value, reference, &mut found);
        self.check_position(reference, &path, &mut found)?;
        if !found.is_empty() {
            self.violations.extend(found);
            return Ok(());
        }
        if current.as_ref() == Some(value) {
            return Ok(());
        }

        self.prepare_parents(reference, &path)?;
        let qualifier = self.qualifier(reference)?;
        let existed = match def.kind {
            PropertyKind::Scalar(_) => self.is_live(&qualifier),
            _ => {
                let keep = Self::kept_cursor(&qualifier, def);
                self.delete_subtree(&qualifier, keep.as_deref())
            }
        };
        self.write_value(reference, def, value)?;
        if !existed {
            self.adjust_parent_count(reference, &path, true)?;
        }
        Ok(())
    }

    /// List positions must exist and incrementing map keys must have been
    /// assigned
    fn check_position(
        &self,
        reference: &PropertyReference,
        path: &[&'m PropertyDefinition],
        found: &mut Vec<ValidationViolation>,
    ) -> StoreResult<()> {
        let (Some(parent), [.., parent_def, _]) = (reference.parent(), path) else {
            return Ok(());
        };
        let parent_q = self.qualifier(&parent)?;
        match (reference.last(), &parent_def.kind) {
            (Some(RefSegment::ListItem(index)), PropertyKind::List(_)) => {
                let count = self.count(&parent_q, parent_def)?;
                if u64::from(*index) >= count {
                    found.push(ValidationViolation::InvalidValue {
                        reference: reference.clone(),
                        reason: format!("index {index} is outside a list of {count} items"),
                    });
                }
            }
            (Some(RefSegment::MapValue(key)), PropertyKind::Map { key: key_def, .. }) => {
                validate_value(key_def, key, &parent.clone().map_key(key.clone()), found);
            }
            (
                Some(RefSegment::MapValue(key)),
                PropertyKind::IncrementingMap { key: key_def, .. },
            ) => {
                let cursor = self.cursor(&parent_q, key_def)?;
                let assigned = matches!(key, Value::UInt(k) if *k >= 1 && *k <= cursor);
                if !assigned {
                    found.push(ValidationViolation::InvalidValue {
                        reference: reference.clone(),
                        reason: format!("key {key} was not assigned by the map"),
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub(super) fn delete_value(&mut self, reference: &PropertyReference) -> StoreResult<()> {
        let path = self.resolve_target(reference)?;
        let def = path[path.len() - 1];

        if let (Some(RefSegment::TypedValue(type_index)), Some(parent)) =
            (reference.last(), reference.parent())
        {
            if def.scalar_kind().is_some() {
                let parent_def = path[path.len() - 2];
                let parent_q = self.qualifier(&parent)?;
                return match self.row.cell(&parent_q, parent_def)? {
                    Some(CellValue::SimpleTagged { type_index: t, .. }) if t == *type_index => {
                        self.delete_value(&parent)
                    }
                    _ => Ok(()),
                };
            }
        }

        let qualifier = self.qualifier(reference)?;
        if !self.is_live(&qualifier) {
            return Ok(());
        }
        let mut found = Vec::new();
        if def.required && matches!(reference.last(), Some(RefSegment::Property(_))) {
            found.push(ValidationViolation::Required {
                reference: reference.clone(),
            });
        }
        if def.is_final {
            found.push(ValidationViolation::Final {
                reference: reference.clone(),
            });
        }
        if !found.is_empty() {
            self.violations.extend(found);
            return Ok(());
        }

        if let Some(RefSegment::ListItem(index)) = reference.last() {
            return self.remove_list_item(reference, *index, &path);
        }
        let keep = Self::kept_cursor(&qualifier, def);
        self.delete_subtree(&qualifier, keep.as_deref());
        self.adjust_parent_count(reference, &path, false)
    }

    /// Write `value` and everything below it at `reference`
    ///
    /// The value has been validated; existing cells below `reference` have
    /// been tombstoned by the caller where needed.
    pub(super) fn write_value(
        &mut self,
        reference: &PropertyReference,
        def: &'m PropertyDefinition,
        value: &Value,
    ) -> StoreResult<()> {
        let qualifier = self.qualifier(reference)?;
        match (&def.kind, value) {
            (PropertyKind::Scalar(_), _) => self.put(qualifier, CellValue::Scalar(value.clone())),
            (PropertyKind::List(item_def), Value::List(items)) => {
                self.put(qualifier.clone(), CellValue::Count(items.len() as u64))?;
                for (i, item) in items.iter().enumerate() {
                    let index = u32::try_from(i)
                        .map_err(|_| StoreError::request(format!("{reference} is too long")))?;
                    match item_def.kind {
                        PropertyKind::Scalar(_) => self.put(
                            list_item_qualifier(&qualifier, index),
                            CellValue::Scalar(item.clone()),
                        )?,
                        _ => self.write_value(&reference.clone().item(index), item_def, item)?,
                    }
                }
                Ok(())
            }
            (PropertyKind::Set(_), Value::Set(items)) => {
                self.put(qualifier.clone(), CellValue::Count(items.len() as u64))?;
                for item in items {
                    let item_q = keyed_item_qualifier(&qualifier, item)?;
                    self.put(item_q, CellValue::Scalar(item.clone()))?;
                }
                Ok(())
            }
            (PropertyKind::Map { value: value_def, .. }, Value::Map(entries)) => {
                self.put(qualifier, CellValue::Count(entries.len() as u64))?;
                for (key, entry) in entries {
                    self.write_value(&reference.clone().map_value(key.clone()), value_def, entry)?;
                }
                Ok(())
            }
            (
                PropertyKind::IncrementingMap {
                    key: key_def,
                    value: value_def,
                },
                Value::Map(entries),
            ) => {
                let mut cursor = self.cursor(&qualifier, key_def)?;
                self.put(qualifier.clone(), CellValue::Count(entries.len() as u64))?;
                for (key, entry) in entries {
                    if let Value::UInt(k) = key {
                        cursor = cursor.max(*k);
                    }
                    self.write_value(&reference.clone().map_value(key.clone()), value_def, entry)?;
                }
                self.put(
                    map_cursor_qualifier(&qualifier),
                    CellValue::Scalar(Value::UInt(cursor)),
                )
            }
            (PropertyKind::Embed(model), Value::Embed(values)) => {
                self.put(qualifier, CellValue::EmbedMarker)?;
                for (index, field) in values.iter() {
                    let Some(field_def) = model.get(index) else {
                        return Err(StoreError::request(format!(
                            "model '{}' has no property {index}",
                            model.name
                        )));
                    };
                    self.write_value(&reference.clone().field(index), field_def, field)?;
                }
                Ok(())
            }
            (PropertyKind::MultiType(types), Value::Typed(typed)) => {
                let Some(type_def) = types.get(&typed.type_index) else {
                    return Err(StoreError::request(format!(
                        "{reference} has no type {}",
                        typed.type_index
                    )));
                };
                if type_def.scalar_kind().is_some() {
                    self.put(
                        qualifier,
                        CellValue::SimpleTagged {
                            type_index: typed.type_index,
                            value: (*typed.value).clone(),
                        },
                    )
                } else {
                    self.put(qualifier, CellValue::ComplexTagged(typed.type_index))?;
                    self.write_value(
                        &reference.clone().typed(typed.type_index),
                        type_def,
                        &typed.value,
                    )
                }
            }
            (kind, other) => Err(StoreError::server(format!(
                "cannot write {} value into {} property {reference}",
                other.kind_name(),
                kind.name()
            ))),
        }
    }
}
