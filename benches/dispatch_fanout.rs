//! Benchmarks for dispatch fan-out
//!
//! This benchmark measures:
//! - Admission cost as the candidate set grows
//! - Map-stage overhead (spawn, limiter, join) with an instant worker
//! - Limiter acquire/release round trips

use ai_lib_dispatch::{
    DispatchEngine, FnWorker, HeuristicEstimator, Job, LimiterDefaults, LimiterRegistry,
    RateLimiter, RateLimiterConfig, StaticCatalog, WorkerDescriptor, WorkerError,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

fn worker_ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("provider/model-{}", i)).collect()
}

fn engine(ids: &[String], max_concurrent: usize) -> DispatchEngine {
    let catalog = StaticCatalog::from_descriptors(
        ids.iter()
            .map(|id| WorkerDescriptor::from_model_id(id.clone(), 128_000)),
    );
    let registry = Arc::new(LimiterRegistry::new(
        LimiterDefaults::new(max_concurrent, 0),
        Arc::new(catalog),
    ));
    let worker = Arc::new(FnWorker::new(
        |id: String, _job: Arc<Job>, _cancel: CancellationToken| async move {
            Ok::<_, WorkerError>(id)
        },
    ));
    DispatchEngine::new(worker, registry, Arc::new(HeuristicEstimator::new()))
}

fn bench_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission");
    let job = Job::with_token_estimate("Summarize", "x".repeat(20_000), 5_000);

    for n in [4usize, 16, 64] {
        let ids = worker_ids(n);
        let engine = engine(&ids, 4);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &ids, |b, ids| {
            b.iter(|| black_box(engine.admission().filter(&job, ids, 20.0)))
        });
    }
    group.finish();
}

fn bench_fanout(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("fanout");
    let job = Arc::new(Job::with_token_estimate("Summarize", "short content", 10));

    for n in [4usize, 16, 64] {
        let ids = worker_ids(n);
        let engine = engine(&ids, 0);
        let cancel = CancellationToken::new();
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &ids, |b, ids| {
            b.to_async(&rt).iter(|| async {
                let report = engine.run(&cancel, job.clone(), ids, 20.0).await.unwrap();
                black_box(report.outcome.outputs.len())
            })
        });
    }
    group.finish();
}

fn bench_limiter(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let limiter = RateLimiter::new(RateLimiterConfig::new(8, 0));
    let cancel = CancellationToken::new();

    c.bench_function("limiter_acquire_release", |b| {
        b.to_async(&rt).iter(|| async {
            let permit = limiter.acquire(&cancel).await.unwrap();
            permit.release();
        })
    });
}

criterion_group!(benches, bench_admission, bench_fanout, bench_limiter);
criterion_main!(benches);
