//! Codec and store benchmarks
//!
//! - `qualifier_*`: reference to qualifier bytes and back
//! - `cell_*`: cell encoding with type indicator and version
//! - `store_*`: end-to-end add/change/get through DataStore
//!
//! ## Running
//!
//! ```bash
//! cargo bench --bench codec_benchmarks
//! cargo bench --bench codec_benchmarks -- "qualifier"  # specific group
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;
use tessera::codec::{decode_qualifier, encode_qualifier};
use tessera::{
    CellValue, Change, DataModel, DataStore, GetOptions, Key, PropertyDefinition,
    PropertyReference, Value, Values, Version,
};

// =============================================================================
// Fixtures
// =============================================================================

fn model() -> DataModel {
    let address = DataModel::new("address")
        .property(1, PropertyDefinition::text("street"))
        .unwrap()
        .property(2, PropertyDefinition::text("city"))
        .unwrap();
    DataModel::new("person")
        .with_key_size(8)
        .property(1, PropertyDefinition::text("name"))
        .unwrap()
        .property(2, PropertyDefinition::uint("age"))
        .unwrap()
        .property(3, PropertyDefinition::list("tags", PropertyDefinition::text("tag")))
        .unwrap()
        .property(
            4,
            PropertyDefinition::map(
                "notes",
                PropertyDefinition::text("topic"),
                PropertyDefinition::text("note"),
            ),
        )
        .unwrap()
        .property(5, PropertyDefinition::embed("home", address))
        .unwrap()
}

fn references() -> Vec<(&'static str, PropertyReference)> {
    vec![
        ("property", PropertyReference::property(2)),
        ("list_item", PropertyReference::property(3).item(7)),
        ("map_value", PropertyReference::property(4).map_value("weekend")),
        ("embed_field", PropertyReference::property(5).field(2)),
    ]
}

fn key(n: u64) -> Key {
    Key::new(n.to_be_bytes().to_vec())
}

// =============================================================================
// Qualifiers
// =============================================================================

fn qualifier_benchmarks(c: &mut Criterion) {
    let model = model();
    let mut group = c.benchmark_group("qualifier");
    group.throughput(Throughput::Elements(1));

    for (name, reference) in references() {
        group.bench_with_input(BenchmarkId::new("encode", name), &reference, |b, r| {
            b.iter(|| encode_qualifier(black_box(r), &model).unwrap())
        });
        let bytes = encode_qualifier(&reference, &model).unwrap();
        group.bench_with_input(BenchmarkId::new("decode", name), &bytes, |b, q| {
            b.iter(|| decode_qualifier(&model, black_box(q)).unwrap())
        });
    }
    group.finish();
}

// =============================================================================
// Cells
// =============================================================================

fn cell_benchmarks(c: &mut Criterion) {
    let name = PropertyDefinition::text("name");
    let age = PropertyDefinition::uint("age");
    let version = Version::new(1_700_000_000_000, 3);
    let mut group = c.benchmark_group("cell");
    group.throughput(Throughput::Elements(1));

    let cases = [
        ("uint", CellValue::Scalar(Value::UInt(36)), &age),
        ("text", CellValue::Scalar(Value::Text("Ada Lovelace".into())), &name),
        ("tombstone", CellValue::Tombstone, &name),
    ];
    for (label, cell, definition) in cases {
        group.bench_with_input(BenchmarkId::new("encode", label), &cell, |b, cell| {
            b.iter(|| black_box(cell).to_versioned_bytes(version).unwrap())
        });
        let bytes = cell.to_versioned_bytes(version).unwrap();
        group.bench_with_input(BenchmarkId::new("decode", label), &bytes, |b, bytes| {
            b.iter(|| CellValue::decode_versioned(black_box(bytes), definition).unwrap())
        });
    }
    group.finish();
}

// =============================================================================
// Store
// =============================================================================

fn store_benchmarks(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let store = DataStore::open_dir(temp_dir.path()).unwrap();
    let id = store.register_model(model()).unwrap();

    const ROWS: u64 = 1_000;
    for n in 0..ROWS {
        store
            .add(
                id,
                Some(key(n)),
                Values::new()
                    .with(1, "row")
                    .with(2, n)
                    .with(3, Value::List(vec!["a".into(), "b".into()])),
            )
            .unwrap();
    }

    let mut group = c.benchmark_group("store");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get", |b| {
        let mut n = 0;
        b.iter(|| {
            n = (n + 7) % ROWS;
            store.get(id, &key(n), GetOptions::default()).unwrap()
        })
    });

    group.bench_function("change_scalar", |b| {
        let mut age = 0u64;
        b.iter(|| {
            age += 1;
            store
                .change(id, &key(age % ROWS), None, vec![Change::set(2u32, age)])
                .unwrap()
        })
    });

    group.bench_function("add", |b| {
        let mut n = ROWS;
        b.iter(|| {
            n += 1;
            store
                .add(id, Some(key(n)), Values::new().with(1, "fresh"))
                .unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, qualifier_benchmarks, cell_benchmarks, store_benchmarks);
criterion_main!(benches);
