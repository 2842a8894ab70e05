//! Performance benchmarks for federation fan-out
//!
//! This benchmark suite measures:
//! - End-to-end federation cost as the number of targets grows
//! - The single-target inline path against pooled execution
//! - The fill phase over merged results

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use federated_search::{
    Chain, ChainId, ChainRegistry, FederationConfig, FederationSearcher, Hit, ProviderConfig, Query, SearchResult,
    SourceSelector, WorkerPoolConfig,
};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Benchmark configuration
struct BenchConfig {
    /// Hits returned by every chain
    hits_per_chain: usize,
    /// Worker threads of the federation pool
    worker_threads: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            hits_per_chain: 10,
            worker_threads: 4,
        }
    }
}

/// Chain answering immediately with a fixed set of hits
struct StaticChain {
    id: ChainId,
    hits: usize,
}

#[async_trait]
impl Chain for StaticChain {
    fn id(&self) -> &ChainId {
        &self.id
    }

    async fn execute(&self, query: Query) -> federated_search::Result<SearchResult> {
        tokio::task::yield_now().await;
        let mut result = SearchResult::new(query);
        for n in 0..self.hits {
            result.add_hit(Hit::new(format!("{}-{}", self.id, n), 1.0 / (n as f64 + 1.0)));
        }
        result.set_total_hit_count(self.hits as u64);
        Ok(result)
    }
}

/// Build a searcher federating to `targets` providers
fn setup_searcher(targets: usize, config: &BenchConfig, inline: bool) -> FederationSearcher<SourceSelector> {
    let mut registry = ChainRegistry::new();
    let mut federation = FederationConfig::new()
        .worker_pool(WorkerPoolConfig::new().worker_threads(config.worker_threads))
        .single_target_inline(inline);

    for n in 0..targets {
        let id = format!("chain-{}", n);
        registry
            .register(Arc::new(StaticChain {
                id: ChainId::new(id.clone()),
                hits: config.hits_per_chain,
            }))
            .unwrap();
        federation = federation.provider(ProviderConfig::new(format!("provider-{}", n), id));
    }

    FederationSearcher::from_config(federation, &registry).unwrap()
}

/// Benchmark federation as the number of targets grows
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");
    let config = BenchConfig::default();
    let rt = Runtime::new().unwrap();

    for targets in [1usize, 4, 16, 64] {
        let searcher = setup_searcher(targets, &config, true);
        group.throughput(Throughput::Elements(targets as u64));
        group.bench_with_input(BenchmarkId::new("federate", targets), &targets, |b, _| {
            b.to_async(&rt).iter(|| async {
                black_box(searcher.federate(Query::new("benchmark")).await);
            })
        });
    }

    group.finish();
}

/// Benchmark inline execution of a single target against the pool
fn bench_single_target(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_target");
    let config = BenchConfig::default();
    let rt = Runtime::new().unwrap();

    for inline in [true, false] {
        let searcher = setup_searcher(1, &config, inline);
        let name = if inline { "inline" } else { "pooled" };
        group.bench_function(name, |b| {
            b.to_async(&rt).iter(|| async {
                black_box(searcher.federate(Query::new("benchmark")).await);
            })
        });
    }

    group.finish();
}

/// Benchmark the fill phase
fn bench_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill");
    let config = BenchConfig::default();
    let rt = Runtime::new().unwrap();

    for targets in [4usize, 16] {
        let searcher = setup_searcher(targets, &config, true);
        group.bench_with_input(BenchmarkId::new("federate_and_fill", targets), &targets, |b, _| {
            b.to_async(&rt).iter(|| async {
                let query = Query::builder().text("benchmark").summary("default").build();
                black_box(searcher.federate(query).await);
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fanout, bench_single_target, bench_fill);
criterion_main!(benches);
