//! # Ingestion Benchmarks
//!
//! Performance benchmarks for scholink-core ingestion and queries.
//!
//! Run with: `cargo bench -p scholink-core`

use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use scholink_core::{Broker, CitationQuery, EventType, IdentifierRef, RawEvent};
use std::hint::black_box;

fn doi(n: usize) -> String {
    format!("10.5281/zenodo.{n}")
}

/// `size` works, each cited by the next one, every tenth work also carrying
/// an alias and a new version.
fn create_citation_chain(size: usize) -> Broker {
    let broker = Broker::in_memory().expect("broker");
    for i in 1..size {
        let mut raw = RawEvent::new(EventType::RelationshipCreated, "bench").with_payload(
            &doi(i),
            "Cites",
            &doi(i - 1),
        );
        if i % 10 == 0 {
            raw = raw
                .with_payload(&doi(i), "IsIdenticalTo", &format!("{}.alias", doi(i)))
                .with_payload(&doi(i), "HasVersion", &format!("{}.v2", doi(i)));
        }
        broker.ingest_raw(&raw).expect("ingest");
    }
    broker
}

/// `size` works all citing one hub.
fn create_star(size: usize) -> Broker {
    let broker = Broker::in_memory().expect("broker");
    for i in 1..size {
        let raw = RawEvent::new(EventType::RelationshipCreated, "bench").with_payload(
            &doi(i),
            "Cites",
            &doi(0),
        );
        broker.ingest_raw(&raw).expect("ingest");
    }
    broker
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest_chain");

    for size in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| black_box(create_citation_chain(size)));
        });
    }

    group.finish();
}

/// One more event into a store that already holds `size` works. The cost
/// should not grow with `size`.
fn bench_ingest_one(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest_one");

    for size in [1000, 10000].iter() {
        let broker = create_citation_chain(*size);
        let mut next = *size;

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                next += 1;
                let raw = RawEvent::new(EventType::RelationshipCreated, "bench")
                    .with_payload(&doi(next), "Cites", &doi(0));
                black_box(broker.ingest_raw(&raw).expect("ingest"))
            });
        });
    }

    group.finish();
}

fn bench_merge_hub(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_hub");

    for size in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter_batched(
                || create_star(size),
                |broker| {
                    let raw = RawEvent::new(EventType::RelationshipCreated, "bench")
                        .with_payload("10.9999/other", "IsIdenticalTo", &doi(0));
                    broker.ingest_raw(&raw).expect("merge");
                    black_box(broker)
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_get_citations(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_citations");

    for size in [100, 1000].iter() {
        let broker = create_star(*size);
        let hub = IdentifierRef::new(doi(0), "doi");

        group.bench_with_input(BenchmarkId::from_parameter(size), &hub, |b, hub| {
            b.iter(|| {
                let citations = broker
                    .get_citations(hub, CitationQuery::default())
                    .expect("query");
                black_box(citations.iter().count())
            });
        });
    }

    group.finish();
}

fn bench_export_canonical(c: &mut Criterion) {
    let mut group = c.benchmark_group("export_canonical");

    for size in [100, 1000].iter() {
        let broker = create_citation_chain(*size);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(broker.export_canonical()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_ingest,
    bench_ingest_one,
    bench_merge_hub,
    bench_get_citations,
    bench_export_canonical,
);

criterion_main!(benches);
