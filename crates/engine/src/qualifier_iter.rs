//! Qualifier iteration
//!
//! A `QualifierMatcher` classifies qualifiers against an exact reference or
//! a wildcard pattern. Scans start at the first qualifier the pattern can
//! produce and stop at the first `OutOfRange` candidate, so only the key
//! range the pattern's leading bytes cover is visited.
//!
//! Historic keys carry the bit-inverted version after the qualifier, so the
//! versions of one qualifier are read newest first.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tessera_core::codec::qualifier::{is_meta_qualifier, qualifier_parts};
use tessera_core::codec::{decode_qualifier, QualifierPart, WildcardWidth};
use tessera_core::varint::read_varint;
use tessera_core::{
    DataModel, DecodedQualifier, Error, Key, PropertyReference, StoreResult, Value, Version,
    VERSION_BYTE_SIZE,
};
use tessera_storage::{KvRead, TableId};

use crate::node::RowBuffer;
use crate::reader::value_at;

/// Predicate on the value at a matched qualifier
pub type ValuePredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Classification of one candidate qualifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// Qualifier matches
    Match,
    /// Qualifier does not match but later ones may
    NoMatch,
    /// No later qualifier can match
    OutOfRange,
}

/// Matcher over exact or wildcard qualifiers
#[derive(Clone)]
pub struct QualifierMatcher {
    parts: Vec<QualifierPart>,
    descendants: bool,
    predicate: Option<ValuePredicate>,
}

impl QualifierMatcher {
    /// Matcher for a possibly fuzzy reference
    pub fn new(reference: &PropertyReference, model: &DataModel) -> StoreResult<Self> {
        Ok(QualifierMatcher {
            parts: qualifier_parts(reference, model)?,
            descendants: false,
            predicate: None,
        })
    }

    /// Matcher for exactly `qualifier`
    pub fn exact(qualifier: Vec<u8>) -> Self {
        QualifierMatcher {
            parts: vec![QualifierPart::Exact(qualifier)],
            descendants: false,
            predicate: None,
        }
    }

    /// Also match every qualifier below a matched one
    pub fn with_descendants(mut self) -> Self {
        self.descendants = true;
        self
    }

    /// Only accept matches whose value satisfies `predicate`
    pub fn with_predicate(mut self, predicate: ValuePredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Whether the pattern contains a wildcard
    pub fn is_fuzzy(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, QualifierPart::Any(_)))
    }

    /// Smallest qualifier that can match
    pub fn first_possible(&self) -> &[u8] {
        match self.parts.first() {
            Some(QualifierPart::Exact(bytes)) => bytes,
            _ => &[],
        }
    }

    /// Whether a matched value passes the predicate
    pub fn accepts(&self, value: &Value) -> bool {
        self.predicate.as_ref().map_or(true, |p| p(value))
    }

    /// Classify one candidate
    pub fn classify(&self, qualifier: &[u8]) -> MatchResult {
        let mut pos = 0;
        for (i, part) in self.parts.iter().enumerate() {
            match part {
                QualifierPart::Exact(bytes) => {
                    let rest = &qualifier[pos..];
                    if rest.starts_with(bytes) {
                        pos += bytes.len();
                    } else if i == 0 && rest > bytes.as_slice() {
                        return MatchResult::OutOfRange;
                    } else {
                        return MatchResult::NoMatch;
                    }
                }
                QualifierPart::Any(WildcardWidth::Fixed(width)) => {
                    if qualifier.len() < pos + width {
                        return MatchResult::NoMatch;
                    }
                    pos += width;
                }
                QualifierPart::Any(WildcardWidth::LengthPrefixed) => {
                    let Ok((len, used)) = read_varint(&qualifier[pos..]) else {
                        return MatchResult::NoMatch;
                    };
                    let end = pos + used + len as usize;
                    if end > qualifier.len() {
                        return MatchResult::NoMatch;
                    }
                    pos = end;
                }
            }
        }
        if pos == qualifier.len() || self.descendants {
            MatchResult::Match
        } else {
            MatchResult::NoMatch
        }
    }
}

impl fmt::Debug for QualifierMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QualifierMatcher")
            .field("parts", &self.parts)
            .field("descendants", &self.descendants)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

/// Qualifiers of live cells in `row` matched by `matcher`
pub fn matching_qualifiers<'r>(row: &'r RowBuffer, matcher: &QualifierMatcher) -> Vec<&'r [u8]> {
    let mut out = Vec::new();
    for (qualifier, node) in row.range_from(matcher.first_possible()) {
        match matcher.classify(qualifier) {
            MatchResult::OutOfRange => break,
            MatchResult::NoMatch => continue,
            MatchResult::Match => {
                if node.live_cell().is_some() {
                    out.push(qualifier);
                }
            }
        }
    }
    out
}

/// Values at every reference `matcher` matches in `row`
pub fn select(
    row: &RowBuffer,
    model: &DataModel,
    matcher: &QualifierMatcher,
) -> StoreResult<Vec<(PropertyReference, Value)>> {
    let mut out = Vec::new();
    for qualifier in matching_qualifiers(row, matcher) {
        if is_meta_qualifier(qualifier) {
            continue;
        }
        let DecodedQualifier::Property { reference, .. } = decode_qualifier(model, qualifier)?
        else {
            continue;
        };
        if let Some(value) = value_at(row, model, &reference)? {
            if matcher.accepts(&value) {
                out.push((reference, value));
            }
        }
    }
    Ok(out)
}

/// One historic cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricCell {
    /// Qualifier within the row
    pub qualifier: Vec<u8>,
    /// Version that wrote the cell
    pub version: Version,
    /// Encoded cell, tombstones included
    pub cell: Vec<u8>,
}

/// Historic cells of `key` written at or before `to_version`
///
/// Versions of each qualifier are visited newest first and at most
/// `max_versions` of them are considered per qualifier.
pub fn scan_historic<R: KvRead + ?Sized>(
    reader: &R,
    table: TableId,
    key: &Key,
    matcher: Option<&QualifierMatcher>,
    to_version: Version,
    max_versions: u32,
) -> StoreResult<Vec<HistoricCell>> {
    let mut start = key.as_bytes().to_vec();
    if let Some(matcher) = matcher {
        start.extend_from_slice(matcher.first_possible());
    }

    let mut out = Vec::new();
    let mut current: Option<Vec<u8>> = None;
    let mut seen = 0u32;
    for entry in reader.seek(table, &start) {
        let (stored_key, cell) = entry?;
        if !stored_key.starts_with(key.as_bytes()) {
            break;
        }
        let Some(split) = stored_key.len().checked_sub(VERSION_BYTE_SIZE) else {
            return Err(Error::Corruption("historic key shorter than a version".into()).into());
        };
        if split < key.len() {
            return Err(Error::Corruption("historic key shorter than its row key".into()).into());
        }
        let qualifier = &stored_key[key.len()..split];
        if let Some(matcher) = matcher {
            match matcher.classify(qualifier) {
                MatchResult::OutOfRange => break,
                MatchResult::NoMatch => continue,
                MatchResult::Match => {}
            }
        }
        let version = Version::from_inverted_bytes(&stored_key[split..])?;
        if version > to_version {
            continue;
        }
        if current.as_deref() != Some(qualifier) {
            current = Some(qualifier.to_vec());
            seen = 0;
        }
        seen += 1;
        if seen > max_versions {
            continue;
        }
        out.push(HistoricCell {
            qualifier: qualifier.to_vec(),
            version,
            cell,
        });
    }
    Ok(out)
}

/// State of every qualifier as of the scanned versions, in qualifier order
///
/// Keeps the newest cell per qualifier.
pub fn latest_per_qualifier(cells: Vec<HistoricCell>) -> BTreeMap<Vec<u8>, HistoricCell> {
    let mut latest = BTreeMap::new();
    for cell in cells {
        latest.entry(cell.qualifier.clone()).or_insert(cell);
    }
    latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::codec::qualifier::{encode_qualifier, keyed_item_qualifier, list_item_qualifier};
    use tessera_core::{CellValue, PropertyDefinition};
    use tessera_storage::{ColumnFamily, KvStore, KvWrite};

    fn model() -> DataModel {
        DataModel::new("doc")
            .property(1, PropertyDefinition::text("title"))
            .unwrap()
            .property(2, PropertyDefinition::list("tags", PropertyDefinition::text("t")))
            .unwrap()
            .property(
                3,
                PropertyDefinition::map(
                    "scores",
                    PropertyDefinition::text("k"),
                    PropertyDefinition::uint("v"),
                ),
            )
            .unwrap()
            .property(4, PropertyDefinition::uint("rank"))
            .unwrap()
    }

    fn v(n: u64) -> Version {
        Version::new(n, 0)
    }

    fn row(model: &DataModel) -> RowBuffer {
        let mut row = RowBuffer::new(false);
        let tags = encode_qualifier(&PropertyReference::property(2), model).unwrap();
        row.put(tags.clone(), &CellValue::Count(3), v(1)).unwrap();
        for (i, t) in ["a", "b", "c"].into_iter().enumerate() {
            row.put(list_item_qualifier(&tags, i as u32), &CellValue::Scalar(t.into()), v(1))
                .unwrap();
        }
        let scores = encode_qualifier(&PropertyReference::property(3), model).unwrap();
        row.put(scores.clone(), &CellValue::Count(2), v(1)).unwrap();
        for (k, n) in [("x", 1u64), ("y", 9)] {
            row.put(
                keyed_item_qualifier(&scores, &k.into()).unwrap(),
                &CellValue::Scalar(Value::UInt(n)),
                v(1),
            )
            .unwrap();
        }
        let rank = encode_qualifier(&PropertyReference::property(4), model).unwrap();
        row.put(rank, &CellValue::Scalar(Value::UInt(5)), v(1)).unwrap();
        row
    }

    #[test]
    fn test_exact_classification() {
        let matcher = QualifierMatcher::exact(vec![0x11, 0x02]);
        assert_eq!(matcher.classify(&[0x11, 0x01]), MatchResult::NoMatch);
        assert_eq!(matcher.classify(&[0x11, 0x02]), MatchResult::Match);
        assert_eq!(matcher.classify(&[0x11, 0x02, 0x05]), MatchResult::NoMatch);
        assert_eq!(matcher.classify(&[0x11, 0x03]), MatchResult::OutOfRange);
        assert_eq!(
            matcher.with_descendants().classify(&[0x11, 0x02, 0x05]),
            MatchResult::Match
        );
    }

    #[test]
    fn test_fuzzy_list_items() {
        let model = model();
        let row = row(&model);
        let matcher = QualifierMatcher::new(&PropertyReference::property(2).any(), &model).unwrap();
        assert!(matcher.is_fuzzy());
        let found = select(&row, &model, &matcher).unwrap();
        let values: Vec<_> = found.into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec!["a".into(), "b".into(), "c".into()]);
    }

    #[test]
    fn test_fuzzy_map_values_with_predicate() {
        let model = model();
        let row = row(&model);
        let matcher = QualifierMatcher::new(&PropertyReference::property(3).any(), &model)
            .unwrap()
            .with_predicate(Arc::new(|v: &Value| matches!(v, Value::UInt(n) if *n > 5)));
        let found = select(&row, &model, &matcher).unwrap();
        assert_eq!(
            found,
            vec![(PropertyReference::property(3).map_value("y"), Value::UInt(9))]
        );
    }

    #[test]
    fn test_scan_stops_out_of_range() {
        let model = model();
        let row = row(&model);
        let matcher = QualifierMatcher::new(&PropertyReference::property(2).any(), &model).unwrap();
        let matched = matching_qualifiers(&row, &matcher);
        assert_eq!(matched.len(), 3);
        let rank = encode_qualifier(&PropertyReference::property(4), &model).unwrap();
        assert_eq!(matcher.classify(&rank), MatchResult::OutOfRange);
    }

    fn historic_store(key: &Key, cells: &[(Vec<u8>, u64, CellValue)]) -> (KvStore, TableId) {
        let store = KvStore::new();
        store.create_tables(1, &[ColumnFamily::HistoricTable]).unwrap();
        let table = TableId::new(1, ColumnFamily::HistoricTable);
        let mut txn = store.begin();
        for (qualifier, version, cell) in cells {
            let mut k = key.as_bytes().to_vec();
            k.extend_from_slice(qualifier);
            k.extend_from_slice(&v(*version).to_inverted_bytes());
            txn.put(table, k, cell.to_bytes().unwrap()).unwrap();
        }
        txn.commit().unwrap();
        (store, table)
    }

    #[test]
    fn test_historic_to_version() {
        let key = Key::new(vec![1; 4]);
        let (store, table) = historic_store(
            &key,
            &[
                (vec![0x21], 1, CellValue::Scalar(Value::UInt(30))),
                (vec![0x21], 2, CellValue::Scalar(Value::UInt(31))),
                (vec![0x21], 3, CellValue::Tombstone),
            ],
        );
        let view = store.read();
        let at = |to: u64| {
            let cells = scan_historic(&view, table, &key, None, v(to), 1000).unwrap();
            latest_per_qualifier(cells)
                .remove(&vec![0x21])
                .map(|c| (c.version, c.cell))
        };
        assert_eq!(at(1).unwrap().0, v(1));
        assert_eq!(at(2).unwrap().0, v(2));
        assert_eq!(at(3).unwrap().1, vec![0]);
        assert!(at(0).is_none());
    }

    #[test]
    fn test_historic_version_cap_resets_per_qualifier() {
        let key = Key::new(vec![1; 4]);
        let (store, table) = historic_store(
            &key,
            &[
                (vec![0x09], 1, CellValue::Scalar("a".into())),
                (vec![0x09], 2, CellValue::Scalar("b".into())),
                (vec![0x21], 1, CellValue::Scalar(Value::UInt(1))),
                (vec![0x21], 2, CellValue::Scalar(Value::UInt(2))),
            ],
        );
        let view = store.read();
        let cells = scan_historic(&view, table, &key, None, Version::MAX, 1).unwrap();
        let versions: Vec<_> = cells.iter().map(|c| (c.qualifier.clone(), c.version)).collect();
        assert_eq!(versions, vec![(vec![0x09], v(2)), (vec![0x21], v(2))]);

        // Newer versions above the bound do not use up the cap
        let old = scan_historic(&view, table, &key, None, v(1), 1).unwrap();
        let versions: Vec<_> = old.iter().map(|c| (c.qualifier.clone(), c.version)).collect();
        assert_eq!(versions, vec![(vec![0x09], v(1)), (vec![0x21], v(1))]);
    }

    #[test]
    fn test_historic_with_matcher() {
        let key = Key::new(vec![1; 4]);
        let (store, table) = historic_store(
            &key,
            &[
                (vec![0x09], 1, CellValue::Scalar("a".into())),
                (vec![0x21], 1, CellValue::Scalar(Value::UInt(1))),
            ],
        );
        let view = store.read();
        let matcher = QualifierMatcher::exact(vec![0x21]);
        let cells = scan_historic(&view, table, &key, Some(&matcher), Version::MAX, 10).unwrap();
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].qualifier, vec![0x21]);
    }
}
