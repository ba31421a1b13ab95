//! Change processor
//!
//! Applies an ordered list of changes to a working copy of one row. Caller
//! misuse (wildcard or map-key references, references of the wrong kind,
//! echo-only changes) aborts with an error. Constraint violations are
//! collected across every change instead, and a change that produced one
//! leaves the row untouched; the caller rejects the whole request if any
//! violation was collected, so nothing of a failed request is persisted.
//!
//! - `values`: Check, Change and Delete, plus subtree writes and deletes
//! - `list`: list edits
//! - `collections`: sets, maps, incrementing maps and multi-type switches

mod collections;
mod list;
mod values;

use tessera_core::codec::qualifier::{encode_qualifier, map_cursor_qualifier};
use tessera_core::codec::CellValue;
use tessera_core::{
    Change, DataModel, IncrementingMapAddition, PropertyDefinition, PropertyKind,
    PropertyReference, RefSegment, StoreError, StoreResult, ValidationViolation, Value, Values,
    Version,
};
use tracing::debug;

use crate::node::RowBuffer;

/// Result of processing one request
#[derive(Debug)]
pub struct Outcome {
    /// Row after every change
    pub row: RowBuffer,
    /// Echoes to report back
    pub echoes: Vec<Change>,
    /// Collected violations
    pub violations: Vec<ValidationViolation>,
}

/// Applies changes to one row
pub struct Processor<'m> {
    model: &'m DataModel,
    version: Version,
    row: RowBuffer,
    violations: Vec<ValidationViolation>,
    echoes: Vec<Change>,
}

impl<'m> Processor<'m> {
    /// Processor writing at `version` over `row`
    pub fn new(model: &'m DataModel, row: RowBuffer, version: Version) -> Self {
        Processor {
            model,
            version,
            row,
            violations: Vec::new(),
            echoes: Vec::new(),
        }
    }

    /// Write the values of a new row
    pub fn add(&mut self, values: &Values) -> StoreResult<()> {
        let model = self.model;
        let mut found = Vec::new();
        tessera_core::validation::validate_values(model, values, None, &mut found);
        if !found.is_empty() {
            self.violations.extend(found);
            return Ok(());
        }
        self.row.set_soft_deleted(false, self.version)?;
        for (index, value) in values.iter() {
            let reference = PropertyReference::property(index);
            let def = reference.resolve(model)?;
            self.write_value(&reference, def, value)?;
        }
        Ok(())
    }

    /// Apply changes in order
    pub fn apply_all(&mut self, changes: &[Change]) -> StoreResult<()> {
        for change in changes {
            self.apply(change)?;
        }
        Ok(())
    }

    /// Apply one change
    pub fn apply(&mut self, change: &Change) -> StoreResult<()> {
        debug!(target: "tessera::change", kind = change.kind_name(), version = %self.version, "applying change");
        match change {
            Change::Check(checks) => {
                for (reference, expected) in checks {
                    self.check(reference, expected)?;
                }
            }
            Change::Change(pairs) => {
                for (reference, value) in pairs {
                    match value {
                        Some(value) => self.set_value(reference, value)?,
                        None => self.delete_value(reference)?,
                    }
                }
            }
            Change::Delete(references) => {
                for reference in references {
                    self.delete_value(reference)?;
                }
            }
            Change::List(lists) => {
                for list in lists {
                    self.change_list(list)?;
                }
            }
            Change::Set(sets) => {
                for set in sets {
                    self.change_set(set)?;
                }
            }
            Change::Map(maps) => {
                for map in maps {
                    self.change_map(map)?;
                }
            }
            Change::IncrementingMap(maps) => {
                let mut additions: Vec<IncrementingMapAddition> = Vec::new();
                for map in maps {
                    additions.extend(self.append_to_map(map)?);
                }
                if !additions.is_empty() {
                    self.echoes.push(Change::IncrementingMapAddition(additions));
                }
            }
            Change::MultiType(switches) => {
                for (reference, type_index) in switches {
                    self.change_type(reference, *type_index)?;
                }
            }
            Change::SoftDelete(deleted) => self.row.set_soft_deleted(*deleted, self.version)?,
            Change::IncrementingMapAddition(_) | Change::Index(_) => {
                return Err(StoreError::server(format!(
                    "{} changes are emitted by the store and cannot be applied",
                    change.kind_name()
                )))
            }
        }
        Ok(())
    }

    /// Stamp the row version and hand back the result
    pub fn finish(mut self) -> StoreResult<Outcome> {
        if self.row.is_dirty() {
            self.row.set_last_version(self.version)?;
        }
        Ok(Outcome {
            row: self.row,
            echoes: self.echoes,
            violations: self.violations,
        })
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    fn qualifier(&self, reference: &PropertyReference) -> StoreResult<Vec<u8>> {
        Ok(encode_qualifier(reference, self.model)?)
    }

    /// Definitions along `reference`, rejecting references that address
    /// several values or a map key
    fn resolve_target(
        &self,
        reference: &PropertyReference,
    ) -> StoreResult<Vec<&'m PropertyDefinition>> {
        if reference.is_fuzzy() {
            return Err(StoreError::request(format!(
                "{reference} contains a wildcard and cannot be changed"
            )));
        }
        if reference.is_map_key() {
            return Err(StoreError::request(format!(
                "{reference} addresses a map key; change the entry instead"
            )));
        }
        Ok(reference.resolve_path(self.model)?)
    }

    fn put(&mut self, qualifier: Vec<u8>, cell: CellValue) -> StoreResult<()> {
        Ok(self.row.put(qualifier, &cell, self.version)?)
    }

    fn is_live(&self, qualifier: &[u8]) -> bool {
        self.row.live(qualifier).is_some()
    }

    fn current_value(&self, reference: &PropertyReference) -> StoreResult<Option<Value>> {
        crate::reader::value_at(&self.row, self.model, reference)
    }

    /// Element count stored at a container qualifier
    fn count(&self, qualifier: &[u8], def: &PropertyDefinition) -> StoreResult<u64> {
        match self.row.cell(qualifier, def)? {
            None => Ok(0),
            Some(CellValue::Count(count)) => Ok(count),
            Some(other) => Err(StoreError::server(format!(
                "expected a count cell for '{}', found {:?}",
                def.name,
                other.indicator()
            ))),
        }
    }

    /// Last key assigned in an incrementing map
    fn cursor(&self, map_qualifier: &[u8], key_def: &PropertyDefinition) -> StoreResult<u64> {
        match self.row.cell(&map_cursor_qualifier(map_qualifier), key_def)? {
            Some(CellValue::Scalar(Value::UInt(last))) => Ok(last),
            None => Ok(0),
            Some(other) => Err(StoreError::server(format!(
                "unexpected cursor cell {:?}",
                other.indicator()
            ))),
        }
    }

    /// Cursor qualifier to keep when the subtree of `def` is replaced
    fn kept_cursor(qualifier: &[u8], def: &PropertyDefinition) -> Option<Vec<u8>> {
        match def.kind {
            PropertyKind::IncrementingMap { .. } => Some(map_cursor_qualifier(qualifier)),
            _ => None,
        }
    }

    /// Tombstone the cell at `qualifier` and every live cell below it
    ///
    /// Returns whether a value was stored at `qualifier`.
    fn delete_subtree(&mut self, qualifier: &[u8], keep: Option<&[u8]>) -> bool {
        let existed = self.is_live(qualifier);
        let targets: Vec<Vec<u8>> = self
            .row
            .prefixed(qualifier)
            .filter(|(q, node)| node.live_cell().is_some() && Some(*q) != keep)
            .map(|(q, _)| q.to_vec())
            .collect();
        for target in targets {
            self.row.tombstone(&target, self.version);
        }
        existed
    }

    /// Adjust the count of the container holding `reference` after an entry
    /// was created or removed below it
    fn adjust_parent_count(
        &mut self,
        reference: &PropertyReference,
        path: &[&'m PropertyDefinition],
        added: bool,
    ) -> StoreResult<()> {
        if !matches!(
            reference.last(),
            Some(RefSegment::MapValue(_) | RefSegment::SetItem(_))
        ) {
            return Ok(());
        }
        let (Some(parent), [.., parent_def, _]) = (reference.parent(), path) else {
            return Ok(());
        };
        let parent_def = *parent_def;
        let parent_q = self.qualifier(&parent)?;
        let created = !self.is_live(&parent_q);
        let count = self.count(&parent_q, parent_def)?;
        let count = if added { count + 1 } else { count.saturating_sub(1) };
        tessera_core::validation::validate_size(parent_def, count, &parent, &mut self.violations);
        self.put(parent_q, CellValue::Count(count))?;
        if created {
            self.adjust_parent_count(&parent, &path[..path.len() - 1], true)?;
        }
        Ok(())
    }

    /// Create missing embed markers and multi-type tags above `reference`
    fn prepare_parents(
        &mut self,
        reference: &PropertyReference,
        path: &[&'m PropertyDefinition],
    ) -> StoreResult<()> {
        let segments = reference.segments();
        for depth in 1..segments.len() {
            let ancestor = PropertyReference::from_segments(segments[..depth].iter().cloned());
            let def = path[depth - 1];
            let qualifier = self.qualifier(&ancestor)?;
            match (&def.kind, &segments[depth]) {
                (PropertyKind::Embed(_), RefSegment::Property(_)) => {
                    if !self.is_live(&qualifier) {
                        self.put(qualifier, CellValue::EmbedMarker)?;
                        self.adjust_parent_count(&ancestor, &path[..depth], true)?;
                    }
                }
                (PropertyKind::MultiType(_), RefSegment::TypedValue(type_index)) => {
                    let current = self.row.cell(&qualifier, def)?;
                    if current != Some(CellValue::ComplexTagged(*type_index)) {
                        let existed = self.delete_subtree(&qualifier, None);
                        self.put(qualifier, CellValue::ComplexTagged(*type_index))?;
                        if !existed {
                            self.adjust_parent_count(&ancestor, &path[..depth], true)?;
                        }
                    }
                }
                (PropertyKind::Map { .. } | PropertyKind::IncrementingMap { .. }, _)
                | (PropertyKind::List(_) | PropertyKind::Set(_), _) => {
                    if !self.is_live(&qualifier) {
                        self.put(qualifier, CellValue::Count(0))?;
                        self.adjust_parent_count(&ancestor, &path[..depth], true)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}
