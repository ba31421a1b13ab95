//! Read and write interfaces of the key-value engine
//!
//! Scans are served in pages: a `KvIter` asks its source for the next
//! `SCAN_PAGE_SIZE` entries after the last key it returned, so no lock or
//! borrow of the underlying map outlives a single page.

use std::collections::VecDeque;
use std::ops::Bound;

use crate::column_family::TableId;
use crate::error::StorageResult;

/// Entries fetched per page of a scan
pub const SCAN_PAGE_SIZE: usize = 256;

/// Key and value of one entry
pub type KvEntry = (Vec<u8>, Vec<u8>);

/// Read access to tables
pub trait KvRead {
    /// Value stored under `key`
    fn get(&self, table: TableId, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Ordered iterator over entries with keys `>= from`
    fn seek(&self, table: TableId, from: &[u8]) -> KvIter<'_>;

    /// All entries whose key starts with `prefix`
    fn scan_prefix(&self, table: TableId, prefix: &[u8]) -> StorageResult<Vec<KvEntry>> {
        let mut out = Vec::new();
        for entry in self.seek(table, prefix) {
            let (key, value) = entry?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key, value));
        }
        Ok(out)
    }
}

/// Write access to tables
pub trait KvWrite {
    /// Store `value` under `key`
    fn put(&mut self, table: TableId, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()>;

    /// Remove `key`
    fn delete(&mut self, table: TableId, key: Vec<u8>) -> StorageResult<()>;
}

/// One page of a scan
pub(crate) struct Page {
    pub entries: Vec<KvEntry>,
    /// Bound to continue from, `None` once the table is exhausted
    pub next: Option<Bound<Vec<u8>>>,
}

/// Source of scan pages
pub(crate) trait PageSource {
    fn page(&self, table: TableId, from: &Bound<Vec<u8>>, limit: usize) -> StorageResult<Page>;
}

/// Ordered scan over one table
pub struct KvIter<'a> {
    source: &'a dyn PageSource,
    table: TableId,
    next: Option<Bound<Vec<u8>>>,
    buffer: VecDeque<KvEntry>,
}

impl<'a> KvIter<'a> {
    pub(crate) fn new(source: &'a dyn PageSource, table: TableId, from: &[u8]) -> Self {
        KvIter {
            source,
            table,
            next: Some(Bound::Included(from.to_vec())),
            buffer: VecDeque::new(),
        }
    }
}

impl Iterator for KvIter<'_> {
    type Item = StorageResult<KvEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.buffer.is_empty() {
            let from = self.next.take()?;
            match self.source.page(self.table, &from, SCAN_PAGE_SIZE) {
                Ok(page) => {
                    self.buffer.extend(page.entries);
                    self.next = page.next;
                }
                Err(e) => return Some(Err(e)),
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
