//! DataStore: the public facade
//!
//! Every mutation runs inside the key-value engine's single writer
//! transaction: the row is loaded into a buffer, the processor applies the
//! changes, index and unique deltas are planned against the same
//! transaction, and only when nothing was violated are cells, index
//! entries and the version flushed and committed. Any failure drops the
//! transaction, so a rejected request leaves no trace.
//!
//! Reads take a consistent view of committed state and never block each
//! other.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tessera_core::codec::qualifier::encode_qualifier;
use tessera_core::codec::{decode_qualifier, scalar_bytes, split_version, CellValue};
use tessera_core::{
    Change, DataModel, DecodedQualifier, Indexable, Key, PropertyReference, StoreError,
    StoreResult, TypedValue, ValidationViolation, Value, Values, Version, DEFAULT_KEY_SIZE,
    VERSION_BYTE_SIZE,
};
use tessera_storage::{ColumnFamily, KvRead, KvStore, KvWrite, TableId, Transaction};
use tracing::{debug, info, warn};

use crate::clock::VersionClock;
use crate::config::{StoreConfig, CONFIG_FILE_NAME};
use crate::index::IndexPlan;
use crate::node::{Node, RowBuffer};
use crate::processor::Processor;
use crate::qualifier_iter::{
    latest_per_qualifier, scan_historic, select, QualifierMatcher, ValuePredicate,
};
use crate::reader::{row_values, value_at};
use crate::update::{Subscription, Update, UpdateChannel};

/// Id assigned to a model at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModelId(pub u32);

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "model#{}", self.0)
    }
}

impl ModelId {
    fn table(self, family: ColumnFamily) -> TableId {
        TableId::new(self.0, family)
    }
}

/// A model known to the store
#[derive(Debug)]
pub struct RegisteredModel {
    /// Assigned id
    pub id: ModelId,
    /// Definition
    pub model: DataModel,
}

/// Result of a successful add
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddResponse {
    /// Key of the new row
    pub key: Key,
    /// Version the row was created at
    pub version: Version,
}

/// Result of a successful change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeResponse {
    /// Version of the row after the change; unchanged when nothing was
    /// written
    pub version: Version,
    /// Assigned incrementing map keys and index deltas
    pub echoes: Vec<Change>,
}

/// Options of a row read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOptions {
    /// Read the row as it was at this version; needs history retention
    pub to_version: Option<Version>,
    /// Treat soft-deleted rows as absent
    pub filter_soft_deleted: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        GetOptions {
            to_version: None,
            filter_soft_deleted: true,
        }
    }
}

impl GetOptions {
    /// Read as of `version`
    pub fn at(version: Version) -> Self {
        GetOptions {
            to_version: Some(version),
            ..Self::default()
        }
    }
}

/// A row as read from the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    /// Row key
    pub key: Key,
    /// Version of the last change visible to the read
    pub version: Version,
    /// Property values
    pub values: Values,
    /// Soft-delete flag
    pub soft_deleted: bool,
}

/// Options of a history read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryOptions {
    /// Ignore versions after this one
    pub to_version: Option<Version>,
    /// Versions per qualifier to visit; the configured cap when `None`
    pub max_versions: Option<u32>,
}

/// One version of one value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricValue {
    /// Addressed value
    pub reference: PropertyReference,
    /// Version that wrote it
    pub version: Version,
    /// Value written, `None` for a deletion
    pub value: Option<Value>,
}

/// One entry of an index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Index value bytes
    pub value: Vec<u8>,
    /// Indexed row
    pub key: Key,
    /// Version that wrote the entry
    pub version: Version,
}

/// Typed, versioned object store
pub struct DataStore {
    config: StoreConfig,
    kv: KvStore,
    clock: VersionClock,
    models: RwLock<FxHashMap<u32, Arc<RegisteredModel>>>,
    updates: UpdateChannel,
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore")
            .field("config", &self.config)
            .field("models", &self.models.read().len())
            .field("version", &self.clock.current())
            .finish()
    }
}

impl DataStore {
    /// Open an empty store
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        info!(
            target: "tessera::store",
            keep_all_versions = config.keep_all_versions,
            max_versions = config.max_versions_per_qualifier,
            "opened store"
        );
        Ok(DataStore {
            updates: UpdateChannel::new(config.update_channel_capacity),
            config,
            kv: KvStore::new(),
            clock: VersionClock::new(),
            models: RwLock::new(FxHashMap::default()),
        })
    }

    /// Open a store configured by `tessera.toml` in `dir`, writing the
    /// default file first if there is none
    pub fn open_dir(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let path = dir.as_ref().join(CONFIG_FILE_NAME);
        StoreConfig::write_default_if_missing(&path)?;
        let config = StoreConfig::from_file(&path)?;
        Self::open(config)
    }

    /// Active configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Register a model and create its tables
    pub fn register_model(&self, model: DataModel) -> StoreResult<ModelId> {
        if model.key_size == 0 {
            return Err(StoreError::request(format!(
                "model '{}' needs a key size of at least 1",
                model.name
            )));
        }
        let mut models = self.models.write();
        if models.values().any(|m| m.model.name == model.name) {
            return Err(StoreError::request(format!(
                "model '{}' is already registered",
                model.name
            )));
        }
        let id = ModelId(
            u32::try_from(models.len() + 1)
                .map_err(|_| StoreError::server("too many registered models"))?,
        );
        let families: Vec<ColumnFamily> = ColumnFamily::CURRENT
            .into_iter()
            .chain(ColumnFamily::HISTORIC)
            .collect();
        self.kv.create_tables(id.0, &families)?;
        info!(
            target: "tessera::store",
            model = %model.name,
            %id,
            properties = model.properties().count(),
            indexes = model.indexes().len(),
            "registered model"
        );
        models.insert(id.0, Arc::new(RegisteredModel { id, model }));
        Ok(id)
    }

    /// Registered model by id
    pub fn model(&self, id: ModelId) -> StoreResult<Arc<RegisteredModel>> {
        self.models
            .read()
            .get(&id.0)
            .cloned()
            .ok_or_else(|| StoreError::request(format!("{id} is not registered")))
    }

    /// Id of the model registered under `name`
    pub fn model_id(&self, name: &str) -> Option<ModelId> {
        self.models
            .read()
            .values()
            .find(|m| m.model.name == name)
            .map(|m| m.id)
    }

    /// Subscribe to committed mutations
    pub fn subscribe(&self) -> Subscription {
        self.updates.subscribe()
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Add a row
    ///
    /// Without a key a random one is generated, which needs a model with
    /// the default key size.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` when the key or a unique value is taken,
    /// `ValidationFail` when a value breaks its definition.
    pub fn add(&self, id: ModelId, key: Option<Key>, values: Values) -> StoreResult<AddResponse> {
        let registered = self.model(id)?;
        let model = &registered.model;
        let key = match key {
            Some(key) if key.len() == model.key_size => key,
            Some(key) => {
                return Err(StoreError::request(format!(
                    "key {key} has {} bytes, model '{}' uses {}",
                    key.len(),
                    model.name,
                    model.key_size
                )))
            }
            None if model.key_size == DEFAULT_KEY_SIZE => Key::generate(),
            None => {
                return Err(StoreError::request(format!(
                    "model '{}' needs explicit keys of {} bytes",
                    model.name, model.key_size
                )))
            }
        };

        let mut txn = self.kv.begin();
        if txn.get(id.table(ColumnFamily::Keys), key.as_bytes())?.is_some() {
            warn!(target: "tessera::store", %key, model = %model.name, "rejected add of existing key");
            return Err(StoreError::AlreadyExists {
                reference: None,
                key,
            });
        }
        let version = self.clock.next();
        let before = RowBuffer::new(self.config.keep_all_versions);
        let mut processor = Processor::new(model, before.clone(), version);
        processor.add(&values)?;
        let outcome = processor.finish()?;
        let plan = IndexPlan::diff(id.0, model, &key, &before, &outcome.row, &txn)?;
        self.reject_violations(&key, outcome.violations, plan.violations.clone())?;

        let cells = outcome.row.flush(&mut txn, id.0, &key)?;
        plan.apply(&mut txn, id.0, &key, version, self.config.keep_all_versions)?;
        txn.put(
            id.table(ColumnFamily::Keys),
            key.as_bytes().to_vec(),
            version.to_bytes().to_vec(),
        )?;
        txn.commit()?;
        debug!(target: "tessera::store", %key, %version, cells, "added row");

        self.updates.publish(Update::Addition {
            model: id,
            key: key.clone(),
            version,
            values,
        });
        Ok(AddResponse { key, version })
    }

    /// Apply `changes` to a row in order, all or nothing
    ///
    /// With `last_version` the request is rejected unless the row is still
    /// at that version.
    ///
    /// # Errors
    ///
    /// `DoesNotExist` for a missing row, `ValidationFail` with every
    /// violation found, `AlreadyExists` on a unique collision and
    /// `RequestException` for malformed changes.
    pub fn change(
        &self,
        id: ModelId,
        key: &Key,
        last_version: Option<Version>,
        changes: Vec<Change>,
    ) -> StoreResult<ChangeResponse> {
        let registered = self.model(id)?;
        let model = &registered.model;
        let mut txn = self.kv.begin();
        let created = self.creation_version(&txn, id, key)?;
        let before = RowBuffer::load(
            &txn,
            id.table(ColumnFamily::Table),
            key,
            self.config.keep_all_versions,
        )?;
        let current = before.last_version().unwrap_or(created);
        if let Some(expected) = last_version {
            if expected != current {
                warn!(target: "tessera::store", %key, %expected, actual = %current, "rejected stale change");
                return Err(StoreError::ValidationFail(vec![
                    ValidationViolation::VersionMismatch {
                        expected,
                        actual: current,
                    },
                ]));
            }
        }

        let version = self.clock.next();
        let mut processor = Processor::new(model, before.clone(), version);
        processor.apply_all(&changes)?;
        let outcome = processor.finish()?;
        let plan = IndexPlan::diff(id.0, model, key, &before, &outcome.row, &txn)?;
        self.reject_violations(key, outcome.violations, plan.violations.clone())?;
        if !outcome.row.is_dirty() {
            debug!(target: "tessera::store", %key, "change wrote nothing");
            return Ok(ChangeResponse {
                version: current,
                echoes: outcome.echoes,
            });
        }

        let cells = outcome.row.flush(&mut txn, id.0, key)?;
        plan.apply(&mut txn, id.0, key, version, self.config.keep_all_versions)?;
        txn.commit()?;
        debug!(target: "tessera::store", %key, %version, cells, changes = changes.len(), "changed row");

        let mut echoes = outcome.echoes;
        if !plan.updates.is_empty() {
            echoes.push(Change::Index(plan.updates));
        }
        let mut published = changes;
        published.extend(echoes.iter().cloned());
        self.updates.publish(Update::Change {
            model: id,
            key: key.clone(),
            version,
            changes: published,
        });
        Ok(ChangeResponse { version, echoes })
    }

    /// Delete a row
    ///
    /// A soft delete sets the row's soft-delete flag and keeps everything
    /// else, including its unique values. A hard delete removes the row's
    /// cells, index entries, unique values, history and key.
    pub fn delete(&self, id: ModelId, key: &Key, hard: bool) -> StoreResult<Version> {
        let registered = self.model(id)?;
        let model = &registered.model;
        let mut txn = self.kv.begin();
        let created = self.creation_version(&txn, id, key)?;
        let row = RowBuffer::load(
            &txn,
            id.table(ColumnFamily::Table),
            key,
            self.config.keep_all_versions,
        )?;

        let version = if hard {
            let version = self.clock.next();
            let plan = IndexPlan::removal(model, &row)?;
            plan.apply(&mut txn, id.0, key, version, false)?;
            let table = id.table(ColumnFamily::Table);
            for (qualifier, _) in row.iter() {
                txn.delete(table, [key.as_bytes(), qualifier].concat())?;
            }
            let purged = if self.config.keep_all_versions {
                purge_history(&mut txn, id, key)?
            } else {
                0
            };
            txn.delete(id.table(ColumnFamily::Keys), key.as_bytes().to_vec())?;
            txn.commit()?;
            debug!(target: "tessera::store", %key, %version, purged, "hard deleted row");
            version
        } else {
            if row.soft_deleted()? {
                return Ok(row.last_version().unwrap_or(created));
            }
            let version = self.clock.next();
            let mut processor = Processor::new(model, row, version);
            processor.apply(&Change::SoftDelete(true))?;
            let outcome = processor.finish()?;
            outcome.row.flush(&mut txn, id.0, key)?;
            txn.commit()?;
            debug!(target: "tessera::store", %key, %version, "soft deleted row");
            version
        };

        self.updates.publish(Update::Removal {
            model: id,
            key: key.clone(),
            version,
            hard,
        });
        Ok(version)
    }

    fn creation_version<R: KvRead + ?Sized>(
        &self,
        reader: &R,
        id: ModelId,
        key: &Key,
    ) -> StoreResult<Version> {
        match reader.get(id.table(ColumnFamily::Keys), key.as_bytes())? {
            Some(bytes) => Ok(Version::from_bytes(&bytes)?),
            None => Err(StoreError::DoesNotExist(key.clone())),
        }
    }

    fn reject_violations(
        &self,
        key: &Key,
        mut violations: Vec<ValidationViolation>,
        unique: Vec<ValidationViolation>,
    ) -> StoreResult<()> {
        violations.extend(unique);
        if violations.is_empty() {
            return Ok(());
        }
        warn!(
            target: "tessera::store",
            %key,
            violations = violations.len(),
            first = %violations[0],
            "rejected mutation"
        );
        Err(StoreError::from_violations(violations))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Read a row
    ///
    /// Returns `None` for missing rows, rows created after `to_version` and,
    /// unless disabled, soft-deleted rows.
    pub fn get(&self, id: ModelId, key: &Key, options: GetOptions) -> StoreResult<Option<StoredRow>> {
        let registered = self.model(id)?;
        let model = &registered.model;
        let reader = self.kv.read();
        let created = match self.creation_version(&reader, id, key) {
            Ok(version) => version,
            Err(StoreError::DoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let row = match options.to_version {
            None => RowBuffer::load(&reader, id.table(ColumnFamily::Table), key, false)?,
            Some(to_version) => {
                self.require_history()?;
                if created > to_version {
                    return Ok(None);
                }
                let cells = scan_historic(
                    &reader,
                    id.table(ColumnFamily::HistoricTable),
                    key,
                    None,
                    to_version,
                    self.config.max_versions_per_qualifier,
                )?;
                RowBuffer::from_nodes(
                    latest_per_qualifier(cells)
                        .into_iter()
                        .map(|(qualifier, cell)| (qualifier, Node::from_cell(cell.version, &cell.cell))),
                )
            }
        };

        let soft_deleted = row.soft_deleted()?;
        if soft_deleted && options.filter_soft_deleted {
            return Ok(None);
        }
        Ok(Some(StoredRow {
            key: key.clone(),
            version: row.last_version().unwrap_or(created),
            values: row_values(&row, model)?,
            soft_deleted,
        }))
    }

    /// Current value at a concrete reference
    pub fn get_value(
        &self,
        id: ModelId,
        key: &Key,
        reference: &PropertyReference,
    ) -> StoreResult<Option<Value>> {
        let registered = self.model(id)?;
        let reader = self.kv.read();
        self.creation_version(&reader, id, key)?;
        let row = RowBuffer::load(&reader, id.table(ColumnFamily::Table), key, false)?;
        value_at(&row, &registered.model, reference)
    }

    /// Values at every reference a possibly fuzzy reference matches,
    /// optionally filtered by a predicate
    pub fn select(
        &self,
        id: ModelId,
        key: &Key,
        reference: &PropertyReference,
        predicate: Option<ValuePredicate>,
    ) -> StoreResult<Vec<(PropertyReference, Value)>> {
        let registered = self.model(id)?;
        let model = &registered.model;
        let mut matcher = QualifierMatcher::new(reference, model)?;
        if let Some(predicate) = predicate {
            matcher = matcher.with_predicate(predicate);
        }
        let reader = self.kv.read();
        self.creation_version(&reader, id, key)?;
        let row = RowBuffer::load(&reader, id.table(ColumnFamily::Table), key, false)?;
        select(&row, model, &matcher)
    }

    /// Versions of the values a reference matches, newest first per
    /// qualifier
    pub fn history(
        &self,
        id: ModelId,
        key: &Key,
        reference: &PropertyReference,
        options: HistoryOptions,
    ) -> StoreResult<Vec<HistoricValue>> {
        self.require_history()?;
        let registered = self.model(id)?;
        let model = &registered.model;
        let matcher = QualifierMatcher::new(reference, model)?;
        let reader = self.kv.read();
        self.creation_version(&reader, id, key)?;
        let cells = scan_historic(
            &reader,
            id.table(ColumnFamily::HistoricTable),
            key,
            Some(&matcher),
            options.to_version.unwrap_or(Version::MAX),
            options
                .max_versions
                .unwrap_or(self.config.max_versions_per_qualifier),
        )?;

        let mut out = Vec::with_capacity(cells.len());
        for cell in cells {
            let DecodedQualifier::Property {
                reference,
                definition,
            } = decode_qualifier(model, &cell.qualifier)?
            else {
                continue;
            };
            let value = match CellValue::decode(&cell.cell, definition)? {
                CellValue::Tombstone => None,
                CellValue::Scalar(value) => Some(value),
                CellValue::SimpleTagged { type_index, value } => {
                    Some(Value::Typed(TypedValue::new(type_index, value)))
                }
                CellValue::Count(_) | CellValue::ComplexTagged(_) | CellValue::EmbedMarker => {
                    continue
                }
            };
            out.push(HistoricValue {
                reference,
                version: cell.version,
                value,
            });
        }
        Ok(out)
    }

    /// Owner of a unique value
    pub fn get_by_unique(
        &self,
        id: ModelId,
        reference: &PropertyReference,
        value: &Value,
    ) -> StoreResult<Option<Key>> {
        let registered = self.model(id)?;
        let model = &registered.model;
        let definition = reference.resolve(model)?;
        if !definition.unique {
            return Err(StoreError::request(format!("{reference} is not unique")));
        }
        let mut lookup = encode_qualifier(reference, model)?;
        lookup.extend_from_slice(&scalar_bytes(value)?);
        let reader = self.kv.read();
        match reader.get(id.table(ColumnFamily::Unique), &lookup)? {
            Some(stored) => {
                let (_, owner) = split_version(&stored)?;
                Ok(Some(Key::new(owner)))
            }
            None => Ok(None),
        }
    }

    /// Current entries of one of the model's indexes, in index order
    pub fn index_entries(&self, id: ModelId, indexable: &Indexable) -> StoreResult<Vec<IndexEntry>> {
        let registered = self.model(id)?;
        let model = &registered.model;
        if !model.indexes().contains(indexable) {
            return Err(StoreError::request(format!(
                "model '{}' has no such index",
                model.name
            )));
        }
        let prefix = indexable.reference_bytes(model)?;
        let reader = self.kv.read();
        let mut out = Vec::new();
        for (entry, version) in reader.scan_prefix(id.table(ColumnFamily::Index), &prefix)? {
            let rest = &entry[prefix.len()..];
            let Some(split) = rest.len().checked_sub(model.key_size) else {
                return Err(StoreError::server("index entry shorter than a row key"));
            };
            out.push(IndexEntry {
                value: rest[..split].to_vec(),
                key: Key::new(&rest[split..]),
                version: Version::from_bytes(&version)?,
            });
        }
        Ok(out)
    }

    fn require_history(&self) -> StoreResult<()> {
        if self.config.keep_all_versions {
            Ok(())
        } else {
            Err(StoreError::request(
                "historic reads need keep_all_versions to be enabled",
            ))
        }
    }
}

/// Remove every historic trace of `key`, returning the number of entries
/// deleted
fn purge_history(txn: &mut Transaction<'_>, id: ModelId, key: &Key) -> StoreResult<usize> {
    let historic_table = id.table(ColumnFamily::HistoricTable);
    let historic_index = id.table(ColumnFamily::HistoricIndex);
    let historic_unique = id.table(ColumnFamily::HistoricUnique);

    let mut doomed: Vec<(TableId, Vec<u8>)> = txn
        .scan_prefix(historic_table, key.as_bytes())?
        .into_iter()
        .map(|(k, _)| (historic_table, k))
        .collect();

    // index ref ++ value ++ row key ++ !version
    for entry in txn.seek(historic_index, &[]) {
        let (k, _) = entry?;
        let Some(end) = k.len().checked_sub(VERSION_BYTE_SIZE) else {
            continue;
        };
        if end >= key.len() && &k[end - key.len()..end] == key.as_bytes() {
            doomed.push((historic_index, k));
        }
    }

    // qualifier ++ value ++ !version, newest first per value; an empty
    // value releases the claim of the next older entry
    let mut group: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    let flush_group = |group: &mut Vec<(Vec<u8>, Vec<u8>)>, doomed: &mut Vec<(TableId, Vec<u8>)>| {
        let mut owner: Option<Vec<u8>> = None;
        for (k, v) in group.drain(..).rev() {
            if !v.is_empty() {
                owner = Some(v);
            }
            if owner.as_deref() == Some(key.as_bytes()) {
                doomed.push((historic_unique, k));
            }
        }
    };
    for entry in txn.seek(historic_unique, &[]) {
        let (k, v) = entry?;
        let Some(end) = k.len().checked_sub(VERSION_BYTE_SIZE) else {
            continue;
        };
        let same_value = group
            .first()
            .map_or(true, |(first, _)| first.len() == k.len() && first[..end] == k[..end]);
        if !same_value {
            flush_group(&mut group, &mut doomed);
        }
        group.push((k, v));
    }
    flush_group(&mut group, &mut doomed);

    let purged = doomed.len();
    for (table, k) in doomed {
        txn.delete(table, k)?;
    }
    Ok(purged)
}
