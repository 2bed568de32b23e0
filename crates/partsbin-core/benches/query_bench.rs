//! # Query Benchmarks
//!
//! Performance benchmarks for filter parsing and evaluation.
//!
//! Run with: `cargo bench -p partsbin-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use partsbin_core::primitives::ROOT_NODE;
use partsbin_core::{Catalog, Query, Scalar};
use std::collections::BTreeMap;
use std::hint::black_box;

const PACKAGES: [&str; 4] = ["SMD", "THT", "QFN", "DIP"];

/// Create a catalog of N resistors with a resistance and a package.
fn create_catalog(size: usize) -> Catalog {
    let mut catalog = Catalog::new();
    for i in 0..size {
        let ohms = Scalar::number(((i % 1000) * 10) as f64).expect("finite");
        let attributes = BTreeMap::from([
            ("resistance".to_string(), ohms),
            (
                "package".to_string(),
                Scalar::string(PACKAGES[i % PACKAGES.len()]),
            ),
        ]);
        catalog
            .create_item(ROOT_NODE, ROOT_NODE, attributes)
            .expect("create");
    }
    catalog
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");

    for query in [
        "resistance>=100",
        "(resistance>=100 & resistance<1000) | package=SMD",
        r"(a=1 | (b=2 & (c\=d=3))) & e=x | f<=4",
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(query), query, |b, query| {
            b.iter(|| black_box(Query::parse(query)));
        });
    }

    group.finish();
}

fn bench_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter");

    for size in [100, 1000, 5000].iter() {
        let catalog = create_catalog(*size);

        group.bench_with_input(BenchmarkId::new("single", size), size, |b, _| {
            b.iter(|| black_box(catalog.filter_items("resistance>=5000")));
        });

        group.bench_with_input(BenchmarkId::new("compound", size), size, |b, _| {
            b.iter(|| {
                black_box(
                    catalog.filter_items("(resistance>=100 & resistance<1000) | package=SMD"),
                )
            });
        });
    }

    group.finish();
}

fn bench_populate(c: &mut Criterion) {
    let mut group = c.benchmark_group("populate_many");

    for size in [100, 1000].iter() {
        let catalog = create_catalog(*size);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(catalog.items()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_parse, bench_filter, bench_populate);
criterion_main!(benches);
