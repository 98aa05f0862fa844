//! Traversal and exchange benchmarks.

use std::collections::HashSet;

use capsule_core::{LogGraph, Metadata};
use capsule_sync::{connected_component, search_after, search_ahead, PolicyKind};
use capsule_testkit::{exchange, ChainFixture, Replica};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

const LIMIT: usize = 1_000_000;

fn graph_of(chain: &ChainFixture) -> LogGraph {
    let metadata: Vec<Metadata> = chain.records.iter().map(|r| r.metadata()).collect();
    LogGraph::from_metadata(&metadata)
}

fn bench_walks(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("walk");

    for len in [1_000usize, 10_000] {
        let chain = ChainFixture::with_seed([1; 32], len);
        let graph = graph_of(&chain);
        let head = chain.records[len - 1].hash;
        let tail = chain.records[0].hash;
        let none = HashSet::new();

        group.bench_with_input(BenchmarkId::new("search_ahead", len), &len, |b, _| {
            b.to_async(&rt)
                .iter(|| async { search_ahead(&graph, head, &none, LIMIT).await.unwrap() })
        });
        group.bench_with_input(BenchmarkId::new("search_after", len), &len, |b, _| {
            b.to_async(&rt)
                .iter(|| async { search_after(&graph, tail, &none, LIMIT).await.unwrap() })
        });
        group.bench_with_input(BenchmarkId::new("connected_component", len), &len, |b, _| {
            b.to_async(&rt).iter(|| async {
                connected_component(&graph, &[head], LIMIT).await.unwrap()
            })
        });
    }

    group.finish();
}

fn bench_exchange(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let chain = ChainFixture::with_seed([2; 32], 2_000);
    let left = chain.scatter(1, 0.5);
    let right = chain.scatter(2, 0.5);

    let mut group = c.benchmark_group("exchange");
    group.sample_size(10);

    for kind in [PolicyKind::Mirror, PolicyKind::Store] {
        group.bench_function(format!("{:?}", kind).to_lowercase(), |b| {
            b.to_async(&rt).iter(|| async {
                let initiator = Replica::memory(1, kind, &left, chain.sync_config()).await.unwrap();
                let receiver = Replica::memory(2, kind, &right, chain.sync_config()).await.unwrap();
                exchange(&initiator, &receiver).await.unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_walks, bench_exchange);
criterion_main!(benches);
