//! Races on shared protection state.

mod common;

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bulwark::{
    CircuitBreakerConfig, CircuitState, ExecutionRequest, MetricsSource, ProtectedOutcome,
    ResourceGuard, ResourceLimits, RoutingDecision, SystemCircuitBreaker,
};
use common::{harness, FixedMetricsSource};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquires_never_exceed_user_limit() {
    let limits = ResourceLimits {
        max_concurrent_per_user: 5,
        max_concurrent_global: 50,
        rate_limit_per_minute: 1_000,
        ..Default::default()
    };
    let guard = Arc::new(ResourceGuard::with_cache_interval(
        limits,
        FixedMetricsSource::idle() as Arc<dyn MetricsSource>,
        Duration::from_secs(60),
    ));

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move { guard.acquire_resources("u1", 0.0).await })
        })
        .collect();

    let granted = join_all(handles)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(true)))
        .count();

    assert_eq!(granted, 5);
    let status = guard.get_resource_status().await;
    assert_eq!(status.user_concurrency.get("u1"), Some(&5));
    guard.stop_monitoring(Duration::from_secs(1)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquires_respect_global_limit() {
    let limits = ResourceLimits {
        max_concurrent_per_user: 10,
        max_concurrent_global: 7,
        rate_limit_per_minute: 1_000,
        ..Default::default()
    };
    let guard = Arc::new(ResourceGuard::with_cache_interval(
        limits,
        FixedMetricsSource::idle() as Arc<dyn MetricsSource>,
        Duration::from_secs(60),
    ));

    let handles: Vec<_> = (0..60)
        .map(|i| {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move { guard.acquire_resources(&format!("user-{}", i % 6), 0.0).await })
        })
        .collect();

    let granted = join_all(handles)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(true)))
        .count();

    assert_eq!(granted, 7);
    assert_eq!(guard.get_current_usage().await.concurrent_executions, 7);
    guard.stop_monitoring(Duration::from_secs(1)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn half_open_admits_exactly_cap_under_contention() {
    let config = CircuitBreakerConfig {
        failure_threshold: 3,
        recovery_timeout_seconds: 0.05,
        max_half_open_calls: 3,
        ..Default::default()
    };
    let system = Arc::new(SystemCircuitBreaker::new(config, BTreeMap::new()));
    for _ in 0..3 {
        system
            .record_execution_result("data", false, None, "boom", None, None)
            .await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let handles: Vec<_> = (0..40)
        .map(|_| {
            let system = Arc::clone(&system);
            tokio::spawn(async move { system.can_execute_agent("data").await })
        })
        .collect();

    let admitted = join_all(handles)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(RoutingDecision::Primary)))
        .count();

    assert_eq!(admitted, 3);
    assert_eq!(system.agent_state("data").await, Some(CircuitState::HalfOpen));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn protected_executions_always_release_slots() {
    let h = harness(
        ResourceLimits {
            max_concurrent_per_user: 3,
            rate_limit_per_minute: 1_000,
            ..Default::default()
        },
        CircuitBreakerConfig {
            failure_threshold: 1_000,
            ..Default::default()
        },
    );

    let handles: Vec<_> = (0..30)
        .map(|i| {
            let manager = h.manager.clone();
            tokio::spawn(async move {
                manager
                    .execute_protected(ExecutionRequest::new("data", "u1"), move |_| async move {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        if i % 3 == 0 {
                            Err(format!("failure {i}"))
                        } else {
                            Ok(i)
                        }
                    })
                    .await
            })
        })
        .collect();

    let outcomes: Vec<ProtectedOutcome<usize>> = join_all(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert!(outcomes.iter().any(ProtectedOutcome::is_completed));

    assert!(h.manager.active_executions().await.is_empty());
    let status = h.manager.resource_guard().get_resource_status().await;
    assert!(status.user_concurrency.is_empty());
    assert!(h.timeouts.registered().is_empty());

    let metrics = h.manager.get_security_metrics().await;
    assert_eq!(metrics.recorded_executions(), metrics.acquisitions);
    h.manager.shutdown().await;
}
