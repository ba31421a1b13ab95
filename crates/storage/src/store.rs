//! KvStore: ordered in-memory tables with single-writer transactions
//!
//! Each table is a `BTreeMap<Vec<u8>, Vec<u8>>` and all tables live behind
//! one `parking_lot::RwLock`. Writers are serialized by a separate mutex:
//!
//! - `begin()` takes the writer mutex for the lifetime of the transaction
//! - writes are buffered in the transaction and read back through it
//! - `commit()` takes the table write lock once and applies the whole batch
//! - dropping an uncommitted transaction discards its writes
//!
//! Since committed state only changes while the writer mutex is held, a
//! transaction never observes another writer's changes and every store
//! action is serializable.
//!
//! # Lock order
//!
//! A `ReadView` holds the table read lock until dropped. Do not commit a
//! transaction from a thread that still holds a `ReadView`.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::column_family::{ColumnFamily, TableId};
use crate::error::{StorageError, StorageResult};
use crate::kv::{KvEntry, KvIter, KvRead, KvWrite, Page, PageSource};

type OrderedTable = BTreeMap<Vec<u8>, Vec<u8>>;
type Tables = FxHashMap<TableId, OrderedTable>;

/// In-memory ordered key-value store
#[derive(Debug, Default)]
pub struct KvStore {
    tables: RwLock<Tables>,
    writer: Mutex<()>,
}

impl KvStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the tables of `families` for `model`
    pub fn create_tables(&self, model: u32, families: &[ColumnFamily]) -> StorageResult<()> {
        let _writer = self.writer.lock();
        let mut tables = self.tables.write();
        if tables.keys().any(|t| t.model == model) {
            return Err(StorageError::ModelExists(model));
        }
        for family in families {
            tables.insert(TableId::new(model, *family), OrderedTable::new());
        }
        debug!(target: "tessera::kv", model, tables = families.len(), "created tables");
        Ok(())
    }

    /// Whether `table` exists
    pub fn has_table(&self, table: TableId) -> bool {
        self.tables.read().contains_key(&table)
    }

    /// Number of committed entries in `table`
    pub fn table_len(&self, table: TableId) -> StorageResult<usize> {
        self.tables
            .read()
            .get(&table)
            .map(BTreeMap::len)
            .ok_or(StorageError::UnknownTable(table))
    }

    /// Consistent view of committed state
    pub fn read(&self) -> ReadView<'_> {
        ReadView {
            tables: self.tables.read(),
        }
    }

    /// Start the single writer transaction, waiting for the current one
    pub fn begin(&self) -> Transaction<'_> {
        let writer = self.writer.lock();
        Transaction {
            store: self,
            _writer: writer,
            pending: BTreeMap::new(),
            finished: false,
        }
    }
}

fn as_slice_bound(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(k) => Bound::Included(k.as_slice()),
        Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn page_of(table: &OrderedTable, from: &Bound<Vec<u8>>, limit: usize) -> Page {
    let entries: Vec<KvEntry> = table
        .range::<[u8], _>((as_slice_bound(from), Bound::Unbounded))
        .take(limit)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let next = if entries.len() == limit {
        entries.last().map(|(k, _)| Bound::Excluded(k.clone()))
    } else {
        None
    };
    Page { entries, next }
}

/// Read-only view of committed state
pub struct ReadView<'a> {
    tables: RwLockReadGuard<'a, Tables>,
}

impl ReadView<'_> {
    fn table(&self, table: TableId) -> StorageResult<&OrderedTable> {
        self.tables.get(&table).ok_or(StorageError::UnknownTable(table))
    }
}

impl PageSource for ReadView<'_> {
    fn page(&self, table: TableId, from: &Bound<Vec<u8>>, limit: usize) -> StorageResult<Page> {
        Ok(page_of(self.table(table)?, from, limit))
    }
}

impl KvRead for ReadView<'_> {
    fn get(&self, table: TableId, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.table(table)?.get(key).cloned())
    }

    fn seek(&self, table: TableId, from: &[u8]) -> KvIter<'_> {
        KvIter::new(self, table, from)
    }
}

/// Buffered write transaction
///
/// Holds the store's writer lock until committed, rolled back or dropped.
pub struct Transaction<'a> {
    store: &'a KvStore,
    _writer: MutexGuard<'a, ()>,
    pending: BTreeMap<TableId, BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
    finished: bool,
}

impl Transaction<'_> {
    /// Number of buffered writes
    pub fn pending_len(&self) -> usize {
        self.pending.values().map(BTreeMap::len).sum()
    }

    fn buffer(&mut self, table: TableId, key: Vec<u8>, value: Option<Vec<u8>>) -> StorageResult<()> {
        if !self.store.has_table(table) {
            return Err(StorageError::UnknownTable(table));
        }
        self.pending.entry(table).or_default().insert(key, value);
        Ok(())
    }

    /// Apply every buffered write atomically, returning the number applied
    pub fn commit(mut self) -> StorageResult<usize> {
        let pending = std::mem::take(&mut self.pending);
        self.finished = true;

        let mut tables = self.store.tables.write();
        if let Some(missing) = pending.keys().find(|t| !tables.contains_key(t)) {
            return Err(StorageError::UnknownTable(*missing));
        }
        let mut applied = 0;
        for (table, writes) in pending {
            let Some(target) = tables.get_mut(&table) else {
                continue;
            };
            for (key, value) in writes {
                match value {
                    Some(value) => {
                        target.insert(key, value);
                    }
                    None => {
                        target.remove(&key);
                    }
                }
                applied += 1;
            }
        }
        debug!(target: "tessera::kv", applied, "committed transaction");
        Ok(applied)
    }

    /// Discard every buffered write
    pub fn rollback(mut self) {
        let discarded = self.pending_len();
        self.pending.clear();
        self.finished = true;
        debug!(target: "tessera::kv", discarded, "rolled back transaction");
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.pending.is_empty() {
            debug!(
                target: "tessera::kv",
                discarded = self.pending_len(),
                "transaction dropped without commit"
            );
        }
    }
}

impl PageSource for Transaction<'_> {
    fn page(&self, table: TableId, from: &Bound<Vec<u8>>, limit: usize) -> StorageResult<Page> {
        let tables = self.store.tables.read();
        let committed = tables
            .get(&table)
            .ok_or(StorageError::UnknownTable(table))?;
        let page = page_of(committed, from, limit);

        let Some(overlay) = self.pending.get(&table) else {
            return Ok(page);
        };
        let upper = match (&page.next, page.entries.last()) {
            (Some(_), Some((last, _))) => Bound::Included(last.clone()),
            _ => Bound::Unbounded,
        };
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = page.entries.into_iter().collect();
        let range = (as_slice_bound(from), as_slice_bound(&upper));
        for (key, value) in overlay.range::<[u8], _>(range) {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(Page {
            entries: merged.into_iter().collect(),
            next: page.next,
        })
    }
}

impl KvRead for Transaction<'_> {
    fn get(&self, table: TableId, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        if let Some(buffered) = self.pending.get(&table).and_then(|t| t.get(key)) {
            return Ok(buffered.clone());
        }
        let tables = self.store.tables.read();
        let committed = tables
            .get(&table)
            .ok_or(StorageError::UnknownTable(table))?;
        Ok(committed.get(key).cloned())
    }

    fn seek(&self, table: TableId, from: &[u8]) -> KvIter<'_> {
        KvIter::new(self, table, from)
    }
}

impl KvWrite for Transaction<'_> {
    fn put(&mut self, table: TableId, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.buffer(table, key, Some(value))
    }

    fn delete(&mut self, table: TableId, key: Vec<u8>) -> StorageResult<()> {
        self.buffer(table, key, None)
    }
}
