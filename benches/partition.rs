//! Benchmarks for the in-memory store.
//!
//! Run with: `cargo bench --bench partition`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use chrono::{Duration, Utc};
use tokio::runtime::Runtime;

use link_graph::{collect_all, Edge, Graph, InMemoryGraph, Link, Partition};

/// Build a store with `n` links chained by edges.
fn populated(rt: &Runtime, n: usize) -> InMemoryGraph {
    let store = InMemoryGraph::new();
    rt.block_on(async {
        let mut prev = None;
        for i in 0..n {
            let link = store
                .upsert_link(Link::new(format!("http://bench/{i}"), Utc::now() - Duration::hours(1)))
                .await
                .unwrap();
            if let Some(src) = prev {
                store.upsert_edge(Edge::new(src, link.id)).await.unwrap();
            }
            prev = Some(link.id);
        }
    });
    store
}

fn bench_upsert_link(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = populated(&rt, 10_000);

    let mut group = c.benchmark_group("upsert_link");
    group.throughput(Throughput::Elements(1));
    group.bench_function("existing_url", |b| {
        b.to_async(&rt).iter(|| async {
            store
                .upsert_link(black_box(Link::new("http://bench/5000", Utc::now())))
                .await
                .unwrap()
        })
    });
    group.finish();
}

fn bench_partition_scan(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("partition_scan");

    for size in [1_000, 10_000, 100_000] {
        let store = populated(&rt, size);
        let ranges = Partition::split(16).unwrap();
        let cutoff = Utc::now();

        group.throughput(Throughput::Elements(size as u64 / 16));
        group.bench_with_input(BenchmarkId::new("links", size), &ranges[0], |b, range| {
            b.to_async(&rt).iter(|| async {
                let iter = store.links(range.from, range.to, cutoff).await.unwrap();
                collect_all(iter).await.unwrap()
            })
        });
        group.bench_with_input(BenchmarkId::new("edges", size), &ranges[0], |b, range| {
            b.to_async(&rt).iter(|| async {
                let iter = store.edges(range.from, range.to, cutoff).await.unwrap();
                collect_all(iter).await.unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_upsert_link, bench_partition_scan);
criterion_main!(benches);
