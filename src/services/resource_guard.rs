//! Resource admission control.
//!
//! Combines the per-user bookkeeping of [`UserResourceTracker`] with cached
//! process/host readings from a [`MetricsSource`] to decide whether a new
//! execution may start. A background monitor refreshes the readings and
//! records threshold crossings without taking part in admission.

use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::user_resource_tracker::UserResourceTracker;
use crate::domain::errors::{ResourceViolation, SamplingError, ViolationKind};
use crate::domain::models::{
    CleanupStats, ResourceHealth, ResourceLimits, ResourceRatios, ResourceStatusReport,
    ResourceUsage,
};
use crate::domain::ports::MetricsSource;

/// Sliding window for the per-user rate limit.
const RATE_LIMIT_WINDOW_SECONDS: i64 = 60;

/// Default minimum age before cached usage is re-sampled.
pub const DEFAULT_USAGE_CACHE: std::time::Duration = std::time::Duration::from_secs(1);

struct GuardState {
    limits: ResourceLimits,
    cache_interval: std::time::Duration,
    source: Arc<dyn MetricsSource>,
    tracker: Mutex<UserResourceTracker>,
    usage: RwLock<UsageCache>,
    /// Serializes sampling so concurrent callers share one refresh
    refresh_lock: Mutex<()>,
    violations: Mutex<BTreeMap<ViolationKind, u64>>,
    monitor_alerts: Mutex<BTreeMap<ViolationKind, u64>>,
}

/// Last usage snapshot and when sampling was last attempted.
///
/// The attempt time advances on failed samples too, so a broken source is
/// retried at most once per cache interval.
#[derive(Default)]
struct UsageCache {
    usage: Option<ResourceUsage>,
    attempted_at: Option<Instant>,
}

struct MonitorTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Admission control for agent executions.
///
/// Counter updates happen under a single tracker lock, so two concurrent
/// `acquire_resources` calls can never both take the last free slot.
pub struct ResourceGuard {
    state: Arc<GuardState>,
    monitor: Mutex<Option<MonitorTask>>,
}

impl ResourceGuard {
    pub fn new(limits: ResourceLimits, source: Arc<dyn MetricsSource>) -> Self {
        Self::with_cache_interval(limits, source, DEFAULT_USAGE_CACHE)
    }

    pub fn with_cache_interval(
        limits: ResourceLimits,
        source: Arc<dyn MetricsSource>,
        cache_interval: std::time::Duration,
    ) -> Self {
        if let Err(err) = limits.validate() {
            warn!(error = %err, "resource guard built with invalid limits");
        }

        Self {
            state: Arc::new(GuardState {
                limits,
                cache_interval,
                source,
                tracker: Mutex::new(UserResourceTracker::new()),
                usage: RwLock::new(UsageCache::default()),
                refresh_lock: Mutex::new(()),
                violations: Mutex::new(BTreeMap::new()),
                monitor_alerts: Mutex::new(BTreeMap::new()),
            }),
            monitor: Mutex::new(None),
        }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.state.limits
    }

    /// Run every admission check for `user_id`, first violation wins.
    ///
    /// On success the request is counted toward the user's rate limit. No
    /// concurrency slot is reserved.
    pub async fn validate_resource_request(
        &self,
        user_id: &str,
        estimated_memory_mb: f64,
    ) -> Result<(), ResourceViolation> {
        let usage = self.state.current_usage().await;
        let mut tracker = self.state.tracker.lock().await;

        let result = self
            .state
            .admit(&mut tracker, user_id, estimated_memory_mb, &usage);
        drop(tracker);

        if let Err(ref violation) = result {
            self.state.count_violation(violation).await;
        }
        result
    }

    /// Validate and, on success, reserve one concurrency slot for `user_id`.
    ///
    /// Returns false without side effects on any violation. Starts the
    /// background monitor on first successful acquisition.
    pub async fn acquire_resources(&self, user_id: &str, estimated_memory_mb: f64) -> bool {
        let usage = self.state.current_usage().await;
        let mut tracker = self.state.tracker.lock().await;

        match self
            .state
            .admit(&mut tracker, user_id, estimated_memory_mb, &usage)
        {
            Ok(()) => {
                let count = tracker.increment_concurrent(user_id);
                let total = tracker.total_concurrent();
                drop(tracker);

                debug!(
                    user_id,
                    user_concurrent = count,
                    global_concurrent = total,
                    "resources acquired"
                );
                self.start_monitoring().await;
                true
            }
            Err(violation) => {
                drop(tracker);
                info!(user_id, reason = %violation, "resource acquisition denied");
                self.state.count_violation(&violation).await;
                false
            }
        }
    }

    /// Give back one concurrency slot. Extra releases are harmless.
    pub async fn release_resources(&self, user_id: &str) {
        let remaining = self.state.tracker.lock().await.decrement_concurrent(user_id);
        debug!(user_id, user_concurrent = remaining, "resources released");
    }

    /// Cached usage, re-sampled first when older than the cache interval.
    pub async fn get_current_usage(&self) -> ResourceUsage {
        self.state.current_usage().await
    }

    /// Health derived from a single usage snapshot plus counter breakdowns.
    ///
    /// Concurrency totals and the per-user breakdown come from one tracker
    /// read, so they always agree.
    pub async fn get_resource_status(&self) -> ResourceStatusReport {
        let mut usage = self.state.current_usage().await;
        let user_concurrency = {
            let tracker = self.state.tracker.lock().await;
            usage.concurrent_executions = tracker.total_concurrent();
            usage.active_users = tracker.active_users();
            tracker.concurrency_snapshot()
        };
        let ratios = ResourceRatios::compute(&usage, &self.state.limits);
        let status = ResourceHealth::from_ratio(ratios.max());

        let violations = self.state.violations.lock().await.clone();
        let monitor_alerts = self.state.monitor_alerts.lock().await.clone();

        ResourceStatusReport {
            status,
            usage,
            limits: self.state.limits.clone(),
            ratios,
            violations,
            monitor_alerts,
            user_concurrency,
            monitoring_active: self.is_monitoring().await,
        }
    }

    /// Drop tracker state for one user, or for everyone when `user_id` is None.
    ///
    /// Crash recovery only; running executions lose their slots.
    pub async fn emergency_cleanup(&self, user_id: Option<&str>) -> CleanupStats {
        let mut tracker = self.state.tracker.lock().await;

        let stats = match user_id {
            Some(user) => {
                let had_entries = tracker.has_entries_for(user);
                let (released, timestamps) = tracker.clear_user(user);
                CleanupStats {
                    users_cleared: usize::from(had_entries),
                    executions_released: released,
                    timestamps_cleared: timestamps,
                }
            }
            None => {
                let (users, released, timestamps) = tracker.clear_all();
                CleanupStats {
                    users_cleared: users,
                    executions_released: released,
                    timestamps_cleared: timestamps,
                }
            }
        };
        drop(tracker);

        warn!(
            user_id = user_id.unwrap_or("*"),
            users_cleared = stats.users_cleared,
            executions_released = stats.executions_released,
            "emergency resource cleanup"
        );
        stats
    }

    /// Start the background monitor. Idempotent.
    pub async fn start_monitoring(&self) {
        let mut slot = self.monitor.lock().await;
        if slot.as_ref().is_some_and(|m| !m.handle.is_finished()) {
            return;
        }

        let token = CancellationToken::new();
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(monitor_loop(state, token.clone()));

        info!(
            interval_secs = self.state.limits.check_interval_seconds,
            "resource monitor started"
        );
        *slot = Some(MonitorTask { token, handle });
    }

    /// Stop the background monitor, waiting at most `timeout` for it to exit.
    ///
    /// Safe to call when the monitor was never started. Returns true if the
    /// monitor exited on its own within the timeout.
    pub async fn stop_monitoring(&self, timeout: std::time::Duration) -> bool {
        let Some(task) = self.monitor.lock().await.take() else {
            return true;
        };

        task.token.cancel();
        let abort = task.handle.abort_handle();
        if let Ok(joined) = tokio::time::timeout(timeout, task.handle).await {
            if let Err(err) = joined {
                warn!(error = %err, "resource monitor ended abnormally");
            }
            info!("resource monitor stopped");
            true
        } else {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "resource monitor did not stop in time, aborting"
            );
            abort.abort();
            false
        }
    }

    pub async fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .await
            .as_ref()
            .is_some_and(|m| !m.handle.is_finished())
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.monitor.try_lock() {
            if let Some(task) = slot.take() {
                task.token.cancel();
            }
        }
    }
}

impl GuardState {
    /// Ordered admission checks; records the rate-limit timestamp on success.
    fn admit(
        &self,
        tracker: &mut UserResourceTracker,
        user_id: &str,
        estimated_memory_mb: f64,
        usage: &ResourceUsage,
    ) -> Result<(), ResourceViolation> {
        let limits = &self.limits;

        let global = tracker.total_concurrent();
        if global >= limits.max_concurrent_global {
            return Err(ResourceViolation::GlobalConcurrency {
                current: global,
                limit: limits.max_concurrent_global,
            });
        }

        let user = tracker.concurrent_for(user_id);
        if user >= limits.max_concurrent_per_user {
            return Err(ResourceViolation::UserConcurrency {
                current: user,
                limit: limits.max_concurrent_per_user,
            });
        }

        let now = Utc::now();
        let cutoff = now - Duration::seconds(RATE_LIMIT_WINDOW_SECONDS);
        tracker.cleanup_old_timestamps(cutoff);
        let recent = tracker.get_recent_request_count(user_id, cutoff);
        if recent >= limits.rate_limit_per_minute as usize {
            return Err(ResourceViolation::RateLimit {
                current: recent,
                limit: limits.rate_limit_per_minute,
            });
        }

        let projected_mb = usage.memory_mb + estimated_memory_mb;
        if projected_mb > limits.max_memory_mb {
            return Err(ResourceViolation::Memory {
                projected_mb,
                limit_mb: limits.max_memory_mb,
            });
        }

        if usage.cpu_percent > limits.max_cpu_percent {
            return Err(ResourceViolation::Cpu {
                current_percent: usage.cpu_percent,
                limit_percent: limits.max_cpu_percent,
            });
        }

        if usage.disk_space_mb < limits.min_disk_space_mb {
            return Err(ResourceViolation::Disk {
                available_mb: usage.disk_space_mb,
                required_mb: limits.min_disk_space_mb,
            });
        }

        tracker.add_request_timestamp(user_id, now);
        Ok(())
    }

    async fn count_violation(&self, violation: &ResourceViolation) {
        *self
            .violations
            .lock()
            .await
            .entry(violation.kind())
            .or_insert(0) += 1;
    }

    /// Cached snapshot when the last sampling attempt is recent enough.
    fn fresh_usage(&self, cache: &UsageCache) -> Option<ResourceUsage> {
        let attempted_at = cache.attempted_at?;
        if attempted_at.elapsed() < self.cache_interval {
            cache.usage.clone()
        } else {
            None
        }
    }

    async fn current_usage(&self) -> ResourceUsage {
        if let Some(usage) = self.fresh_usage(&*self.usage.read().await) {
            return usage;
        }
        self.refresh(false).await
    }

    /// Re-sample, keeping the previous snapshot when sampling fails.
    async fn refresh(&self, force: bool) -> ResourceUsage {
        let _refreshing = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited.
        if !force {
            if let Some(usage) = self.fresh_usage(&*self.usage.read().await) {
                return usage;
            }
        }

        let source = Arc::clone(&self.source);
        let sampled = tokio::task::spawn_blocking(move || source.sample())
            .await
            .map_err(|e| SamplingError::TaskFailed(e.to_string()))
            .and_then(|sample| sample);

        let (concurrent, active_users) = {
            let tracker = self.tracker.lock().await;
            (tracker.total_concurrent(), tracker.active_users())
        };

        let mut cache = self.usage.write().await;
        cache.attempted_at = Some(Instant::now());
        let usage = match sampled {
            Ok(sample) => ResourceUsage::from_sample(&sample, concurrent, active_users),
            Err(err) => {
                warn!(error = %err, "resource sampling failed, using cached usage");
                match cache.usage.take() {
                    Some(previous) => ResourceUsage {
                        concurrent_executions: concurrent,
                        active_users,
                        ..previous
                    },
                    None => ResourceUsage::unsampled(concurrent, active_users),
                }
            }
        };
        cache.usage = Some(usage.clone());
        usage
    }

    /// Passive threshold check for the monitor loop.
    async fn record_threshold_crossings(&self, usage: &ResourceUsage) {
        let limits = &self.limits;
        let mut crossed = Vec::new();

        if usage.memory_mb > limits.max_memory_mb {
            warn!(
                memory_mb = usage.memory_mb,
                limit_mb = limits.max_memory_mb,
                "memory above limit"
            );
            crossed.push(ViolationKind::Memory);
        }
        if usage.cpu_percent > limits.max_cpu_percent {
            warn!(
                cpu_percent = usage.cpu_percent,
                limit_percent = limits.max_cpu_percent,
                "cpu above limit"
            );
            crossed.push(ViolationKind::Cpu);
        }
        if usage.disk_space_mb < limits.min_disk_space_mb {
            warn!(
                disk_space_mb = usage.disk_space_mb,
                required_mb = limits.min_disk_space_mb,
                "free disk space below minimum"
            );
            crossed.push(ViolationKind::Disk);
        }

        if !crossed.is_empty() {
            let mut alerts = self.monitor_alerts.lock().await;
            for kind in crossed {
                *alerts.entry(kind).or_insert(0) += 1;
            }
        }
    }
}

async fn monitor_loop(state: Arc<GuardState>, token: CancellationToken) {
    let mut ticker = interval(state.limits.check_interval());

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                let usage = state.refresh(true).await;
                state
                    .tracker
                    .lock()
                    .await
                    .cleanup_old_timestamps(Utc::now() - Duration::seconds(RATE_LIMIT_WINDOW_SECONDS));
                state.record_threshold_crossings(&usage).await;

                debug!(
                    memory_mb = usage.memory_mb,
                    cpu_percent = usage.cpu_percent,
                    disk_space_mb = usage.disk_space_mb,
                    concurrent = usage.concurrent_executions,
                    "resource check completed"
                );
            }
        }
    }
}
