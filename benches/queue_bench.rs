//! Benchmarks for the session pool service layer.
//!
//! Benchmarks cover:
//! - TTL cache set/get and expiry sweeps
//! - Performance monitor recording and aggregation
//! - Concurrency queue throughput
//! - Pool claim/release cycles
//! - End-to-end command dispatch

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use prometheus_session_pool::builders::ServiceBuilder;
use prometheus_session_pool::config::{PoolConfig, QueueConfig, ServiceConfig};
use prometheus_session_pool::core::{ConcurrencyQueue, PerformanceMonitor, SessionPool, TtlCache};
use prometheus_session_pool::infra::InMemoryLauncher;
use prometheus_session_pool::runtime::ExecuteCommandRequest;

use tokio::runtime::Runtime;

fn open_queue(concurrency: usize) -> QueueConfig {
    QueueConfig {
        concurrency,
        interval_ms: 1000,
        interval_cap: u32::MAX,
        default_timeout_ms: 60_000,
        max_queue_length: None,
    }
}

// ============================================================================
// Cache Benchmarks
// ============================================================================

fn bench_cache_set_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_set_get");

    for size in [100_u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let cache = TtlCache::new(Duration::from_secs(60));
                for i in 0..size {
                    cache.set(format!("key-{i}"), i, None);
                }
                for i in 0..size {
                    black_box(cache.get(&format!("key-{i}")));
                }
            });
        });
    }
    group.finish();
}

fn bench_cache_cleanup(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_cleanup");

    for size in [1_000_u64, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let cache = TtlCache::new(Duration::from_secs(60));
                for i in 0..size {
                    let ttl = if i % 2 == 0 { Some(Duration::ZERO) } else { None };
                    cache.set(i, i, ttl);
                }
                black_box(cache.cleanup());
            });
        });
    }
    group.finish();
}

// ============================================================================
// Monitor Benchmarks
// ============================================================================

fn bench_monitor_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("monitor_aggregate");

    for size in [1_000_usize, 10_000] {
        let monitor = PerformanceMonitor::new(size);
        for i in 0..size {
            let op = if i % 3 == 0 { "claim" } else { "resolver:executeCommand" };
            monitor.record(op, Duration::from_micros((i % 500) as u64), i % 10 != 0);
        }
        group.bench_with_input(BenchmarkId::from_parameter(size), &monitor, |b, monitor| {
            b.iter(|| black_box(monitor.aggregated(None, Duration::from_secs(3600))));
        });
    }
    group.finish();
}

// ============================================================================
// Queue Benchmarks
// ============================================================================

fn bench_queue_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_throughput");

    for concurrency in [1_usize, 5, 20] {
        group.throughput(Throughput::Elements(100));
        group.bench_with_input(
            BenchmarkId::from_parameter(concurrency),
            &concurrency,
            |b, &concurrency| {
                b.to_async(Runtime::new().unwrap()).iter(|| async move {
                    let queue = ConcurrencyQueue::new(open_queue(concurrency));
                    let tasks: Vec<_> = (0..100_u64)
                        .map(|i| queue.enqueue(async move { i * 2 }).unwrap())
                        .collect();
                    for task in tasks {
                        black_box(task.await.unwrap());
                    }
                });
            },
        );
    }
    group.finish();
}

// ============================================================================
// Pool Benchmarks
// ============================================================================

fn bench_pool_claim_release(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let pool = rt.block_on(async {
        let pool = Arc::new(SessionPool::new(
            PoolConfig {
                pool_size: 8,
                ..PoolConfig::default()
            },
            Arc::new(InMemoryLauncher::new()),
        ));
        pool.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool
    });

    c.bench_function("pool_claim_release", |b| {
        b.to_async(&rt).iter(|| {
            let pool = Arc::clone(&pool);
            async move {
                if let Ok(claimed) = pool.claim() {
                    black_box(pool.release(&claimed.id).unwrap());
                }
                tokio::task::yield_now().await;
            }
        });
    });

    rt.block_on(pool.shutdown());
}

// ============================================================================
// End-to-End Scenario
// ============================================================================

fn bench_execute_command(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let services = rt.block_on(async {
        let mut cfg = ServiceConfig::default();
        cfg.pool.pool_size = 4;
        cfg.queue = open_queue(4);
        let services = ServiceBuilder::new(cfg)
            .with_launcher(Arc::new(InMemoryLauncher::new()))
            .build()
            .unwrap();
        services.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        services
    });
    let dispatcher = Arc::clone(&services.dispatcher);

    c.bench_function("execute_command", |b| {
        b.to_async(&rt).iter(|| {
            let dispatcher = Arc::clone(&dispatcher);
            async move {
                let response = dispatcher
                    .execute_command(ExecuteCommandRequest::new("bench").with_caller("bench"))
                    .await;
                if let Some(id) = &response.session_id {
                    let _ = dispatcher.release_session(id, Some("bench"));
                }
                black_box(response);
            }
        });
    });

    rt.block_on(services.shutdown());
}

// ============================================================================
// Benchmark Groups
// ============================================================================

criterion_group!(cache_benches, bench_cache_set_get, bench_cache_cleanup);

criterion_group!(monitor_benches, bench_monitor_aggregate);

criterion_group!(queue_benches, bench_queue_throughput);

criterion_group!(pool_benches, bench_pool_claim_release);

criterion_group!(scenario_benches, bench_execute_command);

criterion_main!(
    cache_benches,
    monitor_benches,
    queue_benches,
    pool_benches,
    scenario_benches
);
