mod common;

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

use bulwark::{MetricsSource, ResourceGuard, ResourceLimits, UserResourceTracker};
use common::FixedMetricsSource;

#[derive(Debug, Clone, Copy)]
enum Op {
    Acquire,
    Release,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Acquire), Just(Op::Release)]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    /// Property: per-user concurrency stays within [0, limit]
    ///
    /// Any interleaving of acquire and release calls for one user keeps the
    /// tracked count equal to a saturating model bounded by the limit.
    #[test]
    fn prop_user_concurrency_bounded(
        limit in 1usize..6,
        ops in prop::collection::vec(op_strategy(), 0..60)
    ) {
        let rt = runtime();
        rt.block_on(async {
            let limits = ResourceLimits {
                max_concurrent_per_user: limit,
                rate_limit_per_minute: 10_000,
                ..Default::default()
            };
            let guard = ResourceGuard::with_cache_interval(
                limits,
                FixedMetricsSource::idle() as Arc<dyn MetricsSource>,
                Duration::from_secs(60),
            );

            let mut model = 0usize;
            for op in ops {
                match op {
                    Op::Acquire => {
                        let acquired = guard.acquire_resources("u1", 0.0).await;
                        prop_assert_eq!(acquired, model < limit);
                        if acquired {
                            model += 1;
                        }
                    }
                    Op::Release => {
                        guard.release_resources("u1").await;
                        model = model.saturating_sub(1);
                    }
                }

                let status = guard.get_resource_status().await;
                let tracked = status.user_concurrency.get("u1").copied().unwrap_or(0);
                prop_assert!(tracked <= limit);
                prop_assert_eq!(tracked, model);
            }
            guard.stop_monitoring(Duration::from_millis(100)).await;
            Ok(())
        })?;
    }

    /// Property: extra releases never go negative and drop the entry at zero
    #[test]
    fn prop_release_idempotent(
        increments in 0usize..10,
        extra_releases in 0usize..10
    ) {
        let mut tracker = UserResourceTracker::new();
        for _ in 0..increments {
            tracker.increment_concurrent("u1");
        }

        for i in 0..(increments + extra_releases) {
            let remaining = tracker.decrement_concurrent("u1");
            let expected = increments.saturating_sub(i + 1);
            prop_assert_eq!(remaining, expected);
            prop_assert_eq!(tracker.has_entries_for("u1"), expected > 0);
        }
        prop_assert_eq!(tracker.total_concurrent(), 0);
    }

    /// Property: rate limiting admits exactly `rate_limit_per_minute` requests
    #[test]
    fn prop_rate_limit_boundary(rate in 1u32..20) {
        let rt = runtime();
        rt.block_on(async {
            let limits = ResourceLimits {
                rate_limit_per_minute: rate,
                ..Default::default()
            };
            let guard = ResourceGuard::with_cache_interval(
                limits,
                FixedMetricsSource::idle() as Arc<dyn MetricsSource>,
                Duration::from_secs(60),
            );

            for _ in 0..rate {
                prop_assert!(guard.validate_resource_request("u1", 0.0).await.is_ok());
            }
            prop_assert!(guard.validate_resource_request("u1", 0.0).await.is_err());
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn status_ratios_match_single_snapshot() {
    let source = FixedMetricsSource::idle();
    let limits = ResourceLimits {
        max_memory_mb: 512.0,
        ..Default::default()
    };
    let guard = ResourceGuard::with_cache_interval(
        limits.clone(),
        Arc::clone(&source) as Arc<dyn MetricsSource>,
        Duration::ZERO,
    );

    for memory in [100.0, 300.0, 480.0] {
        source.set(bulwark::domain::models::SystemSample {
            process_memory_mb: memory,
            ..common::idle_sample()
        });
        let status = guard.get_resource_status().await;
        assert!((status.ratios.memory - status.usage.memory_mb / limits.max_memory_mb).abs() < 1e-9);
        assert!((status.usage.memory_mb - memory).abs() < f64::EPSILON);
    }
}
