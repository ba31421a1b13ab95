//! KvStore integration tests
//!
//! Compares transactional reads and scans against a plain BTreeMap model
//! and exercises the single-writer guarantee across threads.

use std::collections::BTreeMap;
use std::sync::{Arc, Barrier};
use std::thread;

use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use tessera_storage::{ColumnFamily, KvRead, KvStore, KvWrite, StorageResult, TableId};

const TABLE: TableId = TableId::new(7, ColumnFamily::Table);

fn store() -> KvStore {
    let store = KvStore::new();
    store
        .create_tables(7, &[ColumnFamily::Table, ColumnFamily::Keys])
        .unwrap();
    store
}

#[derive(Debug, Clone)]
enum Op {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

fn op() -> impl Strategy<Value = Op> {
    let key = prop::collection::vec(0u8..4, 0..4);
    prop_oneof![
        (key.clone(), prop::collection::vec(any::<u8>(), 0..3)).prop_map(|(k, v)| Op::Put(k, v)),
        key.prop_map(Op::Delete),
    ]
}

proptest! {
    #[test]
    fn prop_transaction_view_matches_model(
        committed in prop::collection::vec(op(), 0..40),
        pending in prop::collection::vec(op(), 0..40),
        from in prop::collection::vec(0u8..4, 0..3),
    ) {
        let store = store();
        let mut model = BTreeMap::new();
        let mut txn = store.begin();
        for op in committed {
            match op {
                Op::Put(k, v) => { model.insert(k.clone(), v.clone()); txn.put(TABLE, k, v).unwrap(); }
                Op::Delete(k) => { model.remove(&k); txn.delete(TABLE, k).unwrap(); }
            }
        }
        txn.commit().unwrap();

        let mut txn = store.begin();
        for op in pending {
            match op {
                Op::Put(k, v) => { model.insert(k.clone(), v.clone()); txn.put(TABLE, k, v).unwrap(); }
                Op::Delete(k) => { model.remove(&k); txn.delete(TABLE, k).unwrap(); }
            }
        }

        let scanned: Vec<_> = txn.seek(TABLE, &from).collect::<StorageResult<_>>().unwrap();
        let expected: Vec<_> = model
            .range(from.clone()..)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        prop_assert_eq!(scanned, expected);

        for key in model.keys() {
            let got = txn.get(TABLE, key).unwrap();
            prop_assert_eq!(got.as_ref(), model.get(key));
        }
    }
}

#[test]
fn test_reads_do_not_see_uncommitted_writes() {
    let store = Arc::new(store());
    let mut txn = store.begin();
    txn.put(TABLE, b"k".to_vec(), b"v".to_vec()).unwrap();

    let reader = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.read().get(TABLE, b"k").unwrap())
    };
    assert_eq!(reader.join().unwrap(), None);

    txn.commit().unwrap();
    assert_eq!(store.read().get(TABLE, b"k").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn test_concurrent_increments_never_lose_updates() {
    const THREADS: usize = 6;
    const ROUNDS: usize = 50;

    let store = Arc::new(store());
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|seed| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut rng = rand::rngs::StdRng::seed_from_u64(seed as u64);
                let mut commits = 0u64;
                barrier.wait();
                for _ in 0..ROUNDS {
                    let mut txn = store.begin();
                    let current = txn
                        .get(TABLE, b"n")
                        .unwrap()
                        .map(|v| u64::from_be_bytes(v.try_into().unwrap()))
                        .unwrap_or(0);
                    let noise: u8 = rng.gen();
                    txn.put(TABLE, vec![noise], vec![]).unwrap();
                    txn.put(TABLE, b"n".to_vec(), (current + 1).to_be_bytes().to_vec())
                        .unwrap();
                    if rng.gen_bool(0.2) {
                        txn.rollback();
                        continue;
                    }
                    txn.commit().unwrap();
                    commits += 1;
                }
                commits
            })
        })
        .collect();

    let committed: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

    let total = store
        .read()
        .get(TABLE, b"n")
        .unwrap()
        .map(|v| u64::from_be_bytes(v.try_into().unwrap()))
        .unwrap();
    assert_eq!(total, committed);
}
