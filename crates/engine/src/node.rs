//! Row buffer
//!
//! Mutations never touch the store directly. The row's cells are loaded into
//! a `RowBuffer`, an ordered map from qualifier to `Node`, and every write of
//! a request lands there first. The buffer is flushed into the transaction
//! only after the whole request validated.
//!
//! Cloning a buffer shares the cell map; the first write through a clone
//! copies it, so the pre-mutation state stays available for index diffs.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;

use tessera_core::codec::qualifier::{LAST_VERSION_QUALIFIER, SOFT_DELETE_QUALIFIER};
use tessera_core::codec::{read_scalar, split_version, CellValue, TypeIndicator};
use tessera_core::{
    Key, PropertyDefinition, Result, ScalarKind, StoreResult, Value, Version, VERSION_BYTE_SIZE,
};
use tessera_storage::{ColumnFamily, KvRead, KvWrite, StorageResult, TableId};

const TOMBSTONE_CELL: [u8; 1] = [TypeIndicator::Tombstone as u8];

/// State of one qualifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Live cell, encoded as indicator and payload
    Value {
        /// Version that wrote the cell
        version: Version,
        /// Encoded cell
        cell: Vec<u8>,
    },
    /// Deleted at `version`
    Tombstone {
        /// Version of the deletion
        version: Version,
    },
    /// Current state plus the states it replaced within this buffer
    History {
        /// Replaced states, oldest first
        previous: Vec<Node>,
        /// Current state
        current: Box<Node>,
    },
}

impl Node {
    /// Decode a `version ++ cell` value from the current table
    pub fn from_stored(bytes: &[u8]) -> Result<Node> {
        let (version, cell) = split_version(bytes)?;
        Ok(Node::from_cell(version, cell))
    }

    /// Node for an encoded cell written at `version`
    pub fn from_cell(version: Version, cell: &[u8]) -> Node {
        if cell.first() == Some(&(TypeIndicator::Tombstone as u8)) {
            Node::Tombstone { version }
        } else {
            Node::Value {
                version,
                cell: cell.to_vec(),
            }
        }
    }

    /// Innermost current state
    pub fn current(&self) -> &Node {
        match self {
            Node::History { current, .. } => current.current(),
            other => other,
        }
    }

    /// Version of the current state
    pub fn version(&self) -> Version {
        match self.current() {
            Node::Value { version, .. } | Node::Tombstone { version } => *version,
            Node::History { .. } => Version::ZERO,
        }
    }

    /// Encoded cell of the current state, `None` when deleted
    pub fn live_cell(&self) -> Option<&[u8]> {
        match self.current() {
            Node::Value { cell, .. } => Some(cell),
            _ => None,
        }
    }

    /// Encoded cell of the current state, tombstones included
    pub fn cell_bytes(&self) -> &[u8] {
        self.live_cell().unwrap_or(&TOMBSTONE_CELL)
    }

    /// `version ++ cell` as stored in the current table
    pub fn to_stored(&self) -> Vec<u8> {
        let cell = self.cell_bytes();
        let mut out = Vec::with_capacity(VERSION_BYTE_SIZE + cell.len());
        out.extend_from_slice(&self.version().to_bytes());
        out.extend_from_slice(cell);
        out
    }

    fn archive(self, next: Node) -> Node {
        match self {
            Node::History {
                mut previous,
                current,
            } => {
                previous.push(*current);
                Node::History {
                    previous,
                    current: Box::new(next),
                }
            }
            other => Node::History {
                previous: vec![other],
                current: Box::new(next),
            },
        }
    }

    fn replace_current(self, next: Node) -> Node {
        match self {
            Node::History { previous, .. } => Node::History {
                previous,
                current: Box::new(next),
            },
            _ => next,
        }
    }
}

/// Working copy of one row's cells
#[derive(Debug, Clone, Default)]
pub struct RowBuffer {
    cells: Arc<BTreeMap<Vec<u8>, Node>>,
    dirty: BTreeSet<Vec<u8>>,
    keep_history: bool,
}

impl RowBuffer {
    /// Empty buffer for a new row
    pub fn new(keep_history: bool) -> Self {
        RowBuffer {
            keep_history,
            ..Self::default()
        }
    }

    /// Load every current cell of `key`
    pub fn load<R: KvRead + ?Sized>(
        reader: &R,
        table: TableId,
        key: &Key,
        keep_history: bool,
    ) -> StoreResult<Self> {
        let mut cells = BTreeMap::new();
        for (stored_key, value) in reader.scan_prefix(table, key.as_bytes())? {
            let qualifier = stored_key[key.len()..].to_vec();
            cells.insert(qualifier, Node::from_stored(&value)?);
        }
        Ok(RowBuffer {
            cells: Arc::new(cells),
            dirty: BTreeSet::new(),
            keep_history,
        })
    }

    /// Read-only buffer over nodes gathered elsewhere, such as the state of
    /// a row as of a historic version
    pub fn from_nodes(nodes: impl IntoIterator<Item = (Vec<u8>, Node)>) -> Self {
        RowBuffer {
            cells: Arc::new(nodes.into_iter().collect()),
            dirty: BTreeSet::new(),
            keep_history: false,
        }
    }

    /// Node at `qualifier`
    pub fn get(&self, qualifier: &[u8]) -> Option<&Node> {
        self.cells.get(qualifier)
    }

    /// Live encoded cell at `qualifier`
    pub fn live(&self, qualifier: &[u8]) -> Option<&[u8]> {
        self.get(qualifier).and_then(Node::live_cell)
    }

    /// Decoded live cell at `qualifier`
    pub fn cell(&self, qualifier: &[u8], def: &PropertyDefinition) -> Result<Option<CellValue>> {
        self.live(qualifier)
            .map(|bytes| CellValue::decode(bytes, def))
            .transpose()
    }

    /// Whether nothing live is stored
    pub fn is_empty(&self) -> bool {
        self.cells.values().all(|node| node.live_cell().is_none())
    }

    /// Write `cell` at `qualifier`
    pub fn put(&mut self, qualifier: Vec<u8>, cell: &CellValue, version: Version) -> Result<()> {
        let bytes = cell.to_bytes()?;
        self.replace(qualifier, Node::from_cell(version, &bytes));
        Ok(())
    }

    /// Tombstone `qualifier`, returning whether a live cell was there
    pub fn tombstone(&mut self, qualifier: &[u8], version: Version) -> bool {
        if self.live(qualifier).is_none() {
            return false;
        }
        self.replace(qualifier.to_vec(), Node::Tombstone { version });
        true
    }

    fn replace(&mut self, qualifier: Vec<u8>, next: Node) {
        let keep_history = self.keep_history;
        let version = next.version();
        let cells = Arc::make_mut(&mut self.cells);
        let node = match cells.remove(&qualifier) {
            Some(prev) if prev.version() == version => prev.replace_current(next),
            Some(prev) if keep_history => prev.archive(next),
            _ => next,
        };
        cells.insert(qualifier.clone(), node);
        self.dirty.insert(qualifier);
    }

    /// Cells whose qualifier starts with `prefix`, in order
    pub fn prefixed<'a>(&'a self, prefix: &'a [u8]) -> impl Iterator<Item = (&'a [u8], &'a Node)> {
        self.range_from(prefix)
            .take_while(move |(qualifier, _)| qualifier.starts_with(prefix))
    }

    /// Cells from `from` onwards, in order
    pub fn range_from<'a>(&'a self, from: &[u8]) -> impl Iterator<Item = (&'a [u8], &'a Node)> {
        self.cells
            .range::<[u8], _>((Bound::Included(from), Bound::Unbounded))
            .map(|(qualifier, node)| (qualifier.as_slice(), node))
    }

    /// All cells in order
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &Node)> {
        self.cells
            .iter()
            .map(|(qualifier, node)| (qualifier.as_slice(), node))
    }

    /// Qualifiers written through this buffer
    pub fn dirty(&self) -> impl Iterator<Item = &[u8]> {
        self.dirty.iter().map(Vec::as_slice)
    }

    /// Whether anything was written
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Version of the last committed change
    pub fn last_version(&self) -> Option<Version> {
        self.get(&LAST_VERSION_QUALIFIER).map(Node::version)
    }

    /// Record the version of this change
    pub fn set_last_version(&mut self, version: Version) -> Result<()> {
        self.put(
            LAST_VERSION_QUALIFIER.to_vec(),
            &CellValue::Scalar(Value::UInt(version.as_u64())),
            version,
        )
    }

    /// Soft-delete flag
    pub fn soft_deleted(&self) -> Result<bool> {
        match self.live(&SOFT_DELETE_QUALIFIER) {
            Some(cell) => Ok(read_scalar(ScalarKind::Bool, &cell[1..])? == Value::Bool(true)),
            None => Ok(false),
        }
    }

    /// Set or clear the soft-delete flag
    pub fn set_soft_deleted(&mut self, deleted: bool, version: Version) -> Result<()> {
        self.put(
            SOFT_DELETE_QUALIFIER.to_vec(),
            &CellValue::Scalar(Value::Bool(deleted)),
            version,
        )
    }

    /// Write dirty cells into the current table, and the historic table
    /// when history is kept. Returns the number of cells written.
    pub fn flush<W: KvWrite + ?Sized>(
        &self,
        writer: &mut W,
        model: u32,
        key: &Key,
    ) -> StorageResult<usize> {
        let table = TableId::new(model, ColumnFamily::Table);
        let historic = TableId::new(model, ColumnFamily::HistoricTable);
        let mut written = 0;
        for qualifier in &self.dirty {
            let Some(node) = self.cells.get(qualifier) else {
                continue;
            };
            let mut stored_key = Vec::with_capacity(key.len() + qualifier.len());
            stored_key.extend_from_slice(key.as_bytes());
            stored_key.extend_from_slice(qualifier);
            if self.keep_history {
                let mut historic_key = stored_key.clone();
                historic_key.extend_from_slice(&node.version().to_inverted_bytes());
                writer.put(historic, historic_key, node.cell_bytes().to_vec())?;
            }
            writer.put(table, stored_key, node.to_stored())?;
            written += 1;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_storage::KvStore;

    fn v(n: u64) -> Version {
        Version::new(n, 0)
    }

    #[test]
    fn test_node_from_stored() {
        let cell = CellValue::Scalar(Value::UInt(30)).to_versioned_bytes(v(1)).unwrap();
        let node = Node::from_stored(&cell).unwrap();
        assert_eq!(node.version(), v(1));
        assert!(node.live_cell().is_some());
        assert_eq!(node.to_stored(), cell);

        let tomb = CellValue::Tombstone.to_versioned_bytes(v(2)).unwrap();
        assert_eq!(Node::from_stored(&tomb).unwrap(), Node::Tombstone { version: v(2) });
    }

    #[test]
    fn test_clone_is_copy_on_write() {
        let mut before = RowBuffer::new(false);
        before.put(vec![9], &CellValue::Scalar(Value::UInt(1)), v(1)).unwrap();
        let mut after = before.clone();
        after.put(vec![9], &CellValue::Scalar(Value::UInt(2)), v(2)).unwrap();

        let one = CellValue::Scalar(Value::UInt(1)).to_bytes().unwrap();
        assert_eq!(before.live(&[9]), Some(one.as_slice()));
        assert_ne!(after.live(&[9]), before.live(&[9]));
    }

    #[test]
    fn test_history_chain() {
        let mut row = RowBuffer::new(true);
        row.put(vec![9], &CellValue::Scalar(Value::UInt(1)), v(1)).unwrap();
        row.put(vec![9], &CellValue::Scalar(Value::UInt(2)), v(2)).unwrap();
        assert!(row.tombstone(&[9], v(3)));
        match row.get(&[9]).unwrap() {
            Node::History { previous, current } => {
                assert_eq!(previous.len(), 2);
                assert_eq!(**current, Node::Tombstone { version: v(3) });
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!row.tombstone(&[9], v(4)));
    }

    #[test]
    fn test_same_version_rewrite_replaces() {
        let mut row = RowBuffer::new(true);
        row.put(vec![9], &CellValue::Scalar(Value::UInt(1)), v(1)).unwrap();
        row.put(vec![9], &CellValue::Scalar(Value::UInt(2)), v(1)).unwrap();
        assert!(matches!(row.get(&[9]), Some(Node::Value { .. })));
    }

    #[test]
    fn test_meta_cells() {
        let mut row = RowBuffer::new(false);
        assert_eq!(row.last_version(), None);
        assert!(!row.soft_deleted().unwrap());
        row.set_last_version(v(5)).unwrap();
        row.set_soft_deleted(true, v(5)).unwrap();
        assert_eq!(row.last_version(), Some(v(5)));
        assert!(row.soft_deleted().unwrap());
    }

    #[test]
    fn test_flush_and_load() {
        let store = KvStore::new();
        store
            .create_tables(1, &[ColumnFamily::Table, ColumnFamily::HistoricTable])
            .unwrap();
        let key = Key::new(vec![7, 7]);

        let mut row = RowBuffer::new(true);
        row.put(vec![9], &CellValue::Scalar(Value::UInt(1)), v(1)).unwrap();
        row.put(vec![17], &CellValue::Count(0), v(1)).unwrap();
        let mut txn = store.begin();
        assert_eq!(row.flush(&mut txn, 1, &key).unwrap(), 2);
        txn.commit().unwrap();

        let loaded = RowBuffer::load(
            &store.read(),
            TableId::new(1, ColumnFamily::Table),
            &key,
            true,
        )
        .unwrap();
        assert_eq!(loaded.live(&[9]), row.live(&[9]));
        assert!(!loaded.is_dirty());
        assert_eq!(
            store
                .table_len(TableId::new(1, ColumnFamily::HistoricTable))
                .unwrap(),
            2
        );
    }

    #[test]
    fn test_prefixed() {
        let mut row = RowBuffer::new(false);
        for q in [vec![8], vec![9, 1], vec![9, 2], vec![10]] {
            row.put(q, &CellValue::EmbedMarker, v(1)).unwrap();
        }
        let found: Vec<_> = row.prefixed(&[9]).map(|(q, _)| q.to_vec()).collect();
        assert_eq!(found, vec![vec![9, 1], vec![9, 2]]);
    }
}
