//! List edits
//!
//! The new list is computed in memory, validated as a whole, then written
//! as a diff against the stored items: positions whose value changed are
//! rewritten, positions past the new end are tombstoned.

use tessera_core::codec::qualifier::list_item_qualifier;
use tessera_core::codec::CellValue;
use tessera_core::validation::{validate_size, validate_value};
use tessera_core::{
    ListChange, PropertyDefinition, PropertyKind, PropertyReference, StoreError, StoreResult,
    ValidationViolation, Value,
};

use super::Processor;

impl<'m> Processor<'m> {
    pub(super) fn change_list(&mut self, change: &ListChange) -> StoreResult<()> {
        let reference = &change.reference;
        let path = self.resolve_target(reference)?;
        let def = path[path.len() - 1];
        if !matches!(def.kind, PropertyKind::List(_)) {
            return Err(StoreError::request(format!(
                "{reference} is a {} property, not a list",
                def.kind.name()
            )));
        }

        let stored = self.stored_list(reference)?;
        let old = stored.clone().unwrap_or_default();
        let mut items: Vec<Value> = old
            .iter()
            .filter(|item| !change.delete_values.contains(item))
            .cloned()
            .collect();
        let mut found = Vec::new();
        for (&index, value) in &change.add_values_at_index {
            let position = index as usize;
            if position > items.len() {
                found.push(ValidationViolation::InvalidValue {
                    reference: reference.clone().item(index),
                    reason: format!("cannot insert at {index} in a list of {} items", items.len()),
                });
                continue;
            }
            items.insert(position, value.clone());
        }
        items.extend(change.add_values_to_end.iter().cloned());

        if items == old {
            self.violations.extend(found);
            return Ok(());
        }
        if def.is_final && stored.is_some() {
            found.push(ValidationViolation::Final {
                reference: reference.clone(),
            });
        }
        validate_value(def, &Value::List(items.clone()), reference, &mut found);
        if !found.is_empty() {
            self.violations.extend(found);
            return Ok(());
        }

        self.prepare_parents(reference, &path)?;
        self.write_list(reference, &path, stored.is_some(), &old, &items)
    }

    /// Remove the item at `index` and shift the rest down
    pub(super) fn remove_list_item(
        &mut self,
        item: &PropertyReference,
        index: u32,
        path: &[&'m PropertyDefinition],
    ) -> StoreResult<()> {
        let (Some(list), [.., list_def, _]) = (item.parent(), path) else {
            return Err(StoreError::request(format!("{item} is not inside a list")));
        };
        let list_path = &path[..path.len() - 1];
        let old = self.stored_list(&list)?.unwrap_or_default();
        let position = index as usize;
        if position >= old.len() {
            return Ok(());
        }
        let mut items = old.clone();
        items.remove(position);

        let mut found = Vec::new();
        if list_def.is_final {
            found.push(ValidationViolation::Final {
                reference: list.clone(),
            });
        }
        validate_size(list_def, items.len() as u64, &list, &mut found);
        if !found.is_empty() {
            self.violations.extend(found);
            return Ok(());
        }
        self.write_list(&list, list_path, true, &old, &items)
    }

    fn stored_list(&self, reference: &PropertyReference) -> StoreResult<Option<Vec<Value>>> {
        match self.current_value(reference)? {
            None => Ok(None),
            Some(Value::List(items)) => Ok(Some(items)),
            Some(other) => Err(StoreError::server(format!(
                "{reference} holds a {} value instead of a list",
                other.kind_name()
            ))),
        }
    }

    fn write_list(
        &mut self,
        reference: &PropertyReference,
        path: &[&'m PropertyDefinition],
        existed: bool,
        old: &[Value],
        new: &[Value],
    ) -> StoreResult<()> {
        let qualifier = self.qualifier(reference)?;
        for (i, value) in new.iter().enumerate() {
            if old.get(i) == Some(value) {
                continue;
            }
            let index = u32::try_from(i)
                .map_err(|_| StoreError::request(format!("{reference} is too long")))?;
            self.put(
                list_item_qualifier(&qualifier, index),
                CellValue::Scalar(value.clone()),
            )?;
        }
        for i in new.len()..old.len() {
            let index = u32::try_from(i)
                .map_err(|_| StoreError::request(format!("{reference} is too long")))?;
            self.delete_subtree(&list_item_qualifier(&qualifier, index), None);
        }
        if !existed || old.len() != new.len() {
            self.put(qualifier, CellValue::Count(new.len() as u64))?;
        }
        if !existed {
            self.adjust_parent_count(reference, path, true)?;
        }
        Ok(())
    }
}
