//! Benchmarks for the admission hot path

use bulwark::domain::models::SystemSample;
use bulwark::{
    CircuitBreakerConfig, FailureType, MetricsSource, ResourceGuard, ResourceLimits,
    SamplingError, SystemCircuitBreaker,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

struct StaticSource;

impl MetricsSource for StaticSource {
    fn sample(&self) -> Result<SystemSample, SamplingError> {
        Ok(SystemSample {
            process_memory_mb: 128.0,
            system_memory_total_mb: 16_384.0,
            process_cpu_percent: 2.0,
            disk_free_mb: 200_000.0,
        })
    }
}

fn guard() -> ResourceGuard {
    let limits = ResourceLimits {
        rate_limit_per_minute: u32::MAX,
        max_concurrent_per_user: 1_000,
        max_concurrent_global: 10_000,
        ..Default::default()
    };
    ResourceGuard::with_cache_interval(limits, Arc::new(StaticSource), Duration::from_secs(3600))
}

fn bench_resource_guard(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("resource_guard");

    let guard = guard();
    group.bench_function("acquire_release_cycle", |b| {
        b.to_async(&rt).iter(|| async {
            let acquired = guard.acquire_resources("bench-user", 0.0).await;
            guard.release_resources("bench-user").await;
            // Drop the rate-limit history so the window stays bounded
            guard.emergency_cleanup(Some("bench-user")).await;
            black_box(acquired)
        });
    });

    group.bench_function("status_report", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(guard.get_resource_status().await) });
    });

    rt.block_on(guard.stop_monitoring(Duration::from_secs(1)));
    group.finish();
}

fn bench_circuit_routing(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("circuit_routing");

    for agents in [1usize, 16, 256] {
        let system = SystemCircuitBreaker::new(
            CircuitBreakerConfig::default(),
            BTreeMap::from([("optimization".to_string(), "data".to_string())]),
        );
        rt.block_on(async {
            for i in 0..agents {
                system.get_or_create_breaker(&format!("agent-{i}"), None).await;
            }
        });

        group.bench_with_input(BenchmarkId::new("can_execute_agent", agents), &agents, |b, _| {
            b.to_async(&rt)
                .iter(|| async { black_box(system.can_execute_agent("agent-0").await) });
        });
    }

    let system = SystemCircuitBreaker::new(
        CircuitBreakerConfig::default(),
        BTreeMap::from([("optimization".to_string(), "data".to_string())]),
    );
    rt.block_on(async {
        for _ in 0..3 {
            system
                .record_execution_result("optimization", false, None, "boom", None, None)
                .await;
        }
    });
    group.bench_function("fallback_routing", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(system.can_execute_agent("optimization").await) });
    });

    group.finish();
}

fn bench_failure_classification(c: &mut Criterion) {
    let messages = [
        "Connection timeout after 30s",
        "Out of memory while allocating buffer",
        "database connection refused",
        "disk quota exceeded",
        "unexpected token in response",
    ];

    c.bench_function("failure_classify", |b| {
        b.iter(|| {
            for message in &messages {
                black_box(FailureType::classify(black_box(message)));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_resource_guard,
    bench_circuit_routing,
    bench_failure_classification
);
criterion_main!(benches);
