//! Index maintenance
//!
//! Index values are computed over the row before and after a mutation and
//! the difference becomes the index delta: an absent old value adds an
//! entry, an absent new value removes one, differing values replace. The
//! same diff runs over every written qualifier whose definition is unique.
//!
//! Entry layouts (per model):
//!
//! | Table            | Key                                    | Value            |
//! |------------------|----------------------------------------|------------------|
//! | index            | index ref ++ value ++ row key           | version          |
//! | historic.index   | index ref ++ value ++ row key ++ !ver   | `[1]` or `[0]`   |
//! | unique           | qualifier ++ value                     | version ++ owner |
//! | historic.unique  | qualifier ++ value ++ !ver              | owner or empty   |

use tessera_core::codec::qualifier::is_meta_qualifier;
use tessera_core::codec::{decode_qualifier, scalar_bytes, split_version, CellValue};
use tessera_core::{
    DataModel, DecodedQualifier, Indexable, IndexUpdate, Key, StoreResult, ValidationViolation,
    Version,
};
use tessera_storage::{ColumnFamily, KvRead, KvWrite, StorageResult, TableId};
use tracing::debug;

use crate::node::RowBuffer;
use crate::reader::value_at;

const ENTRY_PRESENT: [u8; 1] = [1];
const ENTRY_REMOVED: [u8; 1] = [0];

/// Index and unique writes of one mutation, computed before anything is
/// persisted
#[derive(Debug, Default)]
pub struct IndexPlan {
    /// Index deltas, reported back as echoes
    pub updates: Vec<IndexUpdate>,
    /// Unique values claimed by the row, as `qualifier ++ value`
    pub claims: Vec<Vec<u8>>,
    /// Unique values released by the row
    pub releases: Vec<Vec<u8>>,
    /// Unique values owned by other rows
    pub violations: Vec<ValidationViolation>,
}

impl IndexPlan {
    /// Diff indexes and unique values of a row
    ///
    /// `reader` must see the state the mutation will commit over, so that a
    /// unique value claimed by another row is found.
    pub fn diff<R: KvRead + ?Sized>(
        model_id: u32,
        model: &DataModel,
        key: &Key,
        before: &RowBuffer,
        after: &RowBuffer,
        reader: &R,
    ) -> StoreResult<IndexPlan> {
        let mut plan = IndexPlan::default();

        for indexable in model.indexes() {
            let index = indexable.reference_bytes(model)?;
            let old = index_value(indexable, model, before)?;
            let new = index_value(indexable, model, after)?;
            match (old, new) {
                (Some(value), None) => plan.updates.push(IndexUpdate::Delete { index, value }),
                (previous, Some(value)) if previous.as_ref() != Some(&value) => {
                    plan.updates.push(IndexUpdate::Update {
                        index,
                        value,
                        previous,
                    })
                }
                _ => {}
            }
        }

        let unique_table = TableId::new(model_id, ColumnFamily::Unique);
        for qualifier in after.dirty() {
            if is_meta_qualifier(qualifier) {
                continue;
            }
            let DecodedQualifier::Property {
                reference,
                definition,
            } = decode_qualifier(model, qualifier)?
            else {
                continue;
            };
            if !definition.unique {
                continue;
            }
            let old = unique_value(before.cell(qualifier, definition)?)?;
            let new = unique_value(after.cell(qualifier, definition)?)?;
            if old == new {
                continue;
            }
            if let Some(value) = new {
                let claim = [qualifier, value.as_slice()].concat();
                match reader.get(unique_table, &claim)? {
                    Some(stored) => {
                        let (_, owner) = split_version(&stored)?;
                        if owner != key.as_bytes() {
                            plan.violations.push(ValidationViolation::AlreadyExists {
                                reference: reference.clone(),
                                key: Key::new(owner),
                            });
                        }
                    }
                    None => plan.claims.push(claim),
                }
            }
            if let Some(value) = old {
                plan.releases.push([qualifier, value.as_slice()].concat());
            }
        }

        Ok(plan)
    }

    /// Remove every index entry and unique value of a row
    pub fn removal(model: &DataModel, row: &RowBuffer) -> StoreResult<IndexPlan> {
        let mut plan = IndexPlan::default();
        for indexable in model.indexes() {
            if let Some(value) = index_value(indexable, model, row)? {
                plan.updates.push(IndexUpdate::Delete {
                    index: indexable.reference_bytes(model)?,
                    value,
                });
            }
        }
        for (qualifier, node) in row.iter() {
            if is_meta_qualifier(qualifier) || node.live_cell().is_none() {
                continue;
            }
            let DecodedQualifier::Property { definition, .. } = decode_qualifier(model, qualifier)?
            else {
                continue;
            };
            if !definition.unique {
                continue;
            }
            if let Some(value) = unique_value(row.cell(qualifier, definition)?)? {
                plan.releases.push([qualifier, value.as_slice()].concat());
            }
        }
        Ok(plan)
    }

    /// Whether the plan writes nothing
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.claims.is_empty() && self.releases.is_empty()
    }

    /// Write the planned entries
    pub fn apply<W: KvWrite + ?Sized>(
        &self,
        writer: &mut W,
        model_id: u32,
        key: &Key,
        version: Version,
        keep_history: bool,
    ) -> StorageResult<()> {
        let index = TableId::new(model_id, ColumnFamily::Index);
        let historic_index = TableId::new(model_id, ColumnFamily::HistoricIndex);
        let unique = TableId::new(model_id, ColumnFamily::Unique);
        let historic_unique = TableId::new(model_id, ColumnFamily::HistoricUnique);

        let entry = |index_ref: &[u8], value: &[u8]| [index_ref, value, key.as_bytes()].concat();
        let versioned = |mut k: Vec<u8>| {
            k.extend_from_slice(&version.to_inverted_bytes());
            k
        };

        for update in &self.updates {
            let (index_ref, removed, added) = match update {
                IndexUpdate::Update {
                    index,
                    value,
                    previous,
                } => (index, previous.as_ref(), Some(value)),
                IndexUpdate::Delete { index, value } => (index, Some(value), None),
            };
            if let Some(value) = removed {
                let k = entry(index_ref, value);
                if keep_history {
                    writer.put(historic_index, versioned(k.clone()), ENTRY_REMOVED.to_vec())?;
                }
                writer.delete(index, k)?;
            }
            if let Some(value) = added {
                let k = entry(index_ref, value);
                if keep_history {
                    writer.put(historic_index, versioned(k.clone()), ENTRY_PRESENT.to_vec())?;
                }
                writer.put(index, k, version.to_bytes().to_vec())?;
            }
        }

        for released in &self.releases {
            if keep_history {
                writer.put(historic_unique, versioned(released.clone()), Vec::new())?;
            }
            writer.delete(unique, released.clone())?;
        }
        for claim in &self.claims {
            if keep_history {
                writer.put(
                    historic_unique,
                    versioned(claim.clone()),
                    key.as_bytes().to_vec(),
                )?;
            }
            writer.put(
                unique,
                claim.clone(),
                [version.to_bytes().as_slice(), key.as_bytes()].concat(),
            )?;
        }

        debug!(
            target: "tessera::index",
            key = %key,
            updates = self.updates.len(),
            claims = self.claims.len(),
            releases = self.releases.len(),
            "applied index plan"
        );
        Ok(())
    }
}

fn index_value(
    indexable: &Indexable,
    model: &DataModel,
    row: &RowBuffer,
) -> StoreResult<Option<Vec<u8>>> {
    indexable.index_value(&mut |reference| value_at(row, model, reference))
}

fn unique_value(cell: Option<CellValue>) -> StoreResult<Option<Vec<u8>>> {
    match cell {
        Some(CellValue::Scalar(value)) => Ok(Some(scalar_bytes(&value)?)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::codec::qualifier::encode_qualifier;
    use tessera_core::{PropertyDefinition, PropertyReference, Value};
    use tessera_storage::KvStore;

    fn model() -> DataModel {
        DataModel::new("person")
            .with_key_size(2)
            .property(1, PropertyDefinition::text("name"))
            .unwrap()
            .property(2, PropertyDefinition::uint("age").with_unique())
            .unwrap()
            .index(Indexable::Reference(PropertyReference::property(2)))
            .unwrap()
    }

    fn store() -> KvStore {
        let store = KvStore::new();
        store
            .create_tables(
                1,
                &[
                    ColumnFamily::Index,
                    ColumnFamily::HistoricIndex,
                    ColumnFamily::Unique,
                    ColumnFamily::HistoricUnique,
                ],
            )
            .unwrap();
        store
    }

    fn with_age(model: &DataModel, row: &RowBuffer, age: u64, version: Version) -> RowBuffer {
        let mut after = row.clone();
        let q = encode_qualifier(&PropertyReference::property(2), model).unwrap();
        after
            .put(q, &CellValue::Scalar(Value::UInt(age)), version)
            .unwrap();
        after
    }

    #[test]
    fn test_diff_add_and_replace() {
        let model = model();
        let store = store();
        let key = Key::new(vec![0, 1]);
        let empty = RowBuffer::new(false);

        let first = with_age(&model, &empty, 30, Version::new(1, 0));
        let plan = IndexPlan::diff(1, &model, &key, &empty, &first, &store.read()).unwrap();
        assert_eq!(plan.updates.len(), 1);
        assert!(matches!(
            &plan.updates[0],
            IndexUpdate::Update { previous: None, .. }
        ));
        assert_eq!(plan.claims.len(), 1);
        assert!(plan.releases.is_empty());
        let mut txn = store.begin();
        plan.apply(&mut txn, 1, &key, Version::new(1, 0), true).unwrap();
        txn.commit().unwrap();

        let loaded = {
            let mut row = RowBuffer::new(false);
            let q = encode_qualifier(&PropertyReference::property(2), &model).unwrap();
            row.put(q, &CellValue::Scalar(Value::UInt(30)), Version::new(1, 0))
                .unwrap();
            row
        };
        let second = with_age(&model, &loaded, 31, Version::new(2, 0));
        let plan = IndexPlan::diff(1, &model, &key, &loaded, &second, &store.read()).unwrap();
        match &plan.updates[..] {
            [IndexUpdate::Update {
                value, previous, ..
            }] => {
                assert_eq!(value, &31u64.to_be_bytes().to_vec());
                assert_eq!(previous, &Some(30u64.to_be_bytes().to_vec()));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(plan.claims.len(), 1);
        assert_eq!(plan.releases.len(), 1);
    }

    #[test]
    fn test_unique_conflict_with_other_owner() {
        let model = model();
        let store = store();
        let empty = RowBuffer::new(false);
        let owner = Key::new(vec![0, 1]);
        let first = with_age(&model, &empty, 30, Version::new(1, 0));
        let plan = IndexPlan::diff(1, &model, &owner, &empty, &first, &store.read()).unwrap();
        let mut txn = store.begin();
        plan.apply(&mut txn, 1, &owner, Version::new(1, 0), false).unwrap();
        txn.commit().unwrap();

        let other = Key::new(vec![0, 2]);
        let plan = IndexPlan::diff(1, &model, &other, &empty, &first, &store.read()).unwrap();
        assert_eq!(
            plan.violations,
            vec![ValidationViolation::AlreadyExists {
                reference: PropertyReference::property(2),
                key: owner.clone(),
            }]
        );

        let plan = IndexPlan::diff(1, &model, &owner, &empty, &first, &store.read()).unwrap();
        assert!(plan.violations.is_empty());
    }

    #[test]
    fn test_removal_releases_everything() {
        let model = model();
        let row = with_age(&model, &RowBuffer::new(false), 40, Version::new(1, 0));
        let plan = IndexPlan::removal(&model, &row).unwrap();
        assert!(matches!(&plan.updates[..], [IndexUpdate::Delete { .. }]));
        assert_eq!(plan.releases.len(), 1);
        assert!(!plan.is_empty());
    }
}
