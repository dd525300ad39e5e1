//! Three-phase execution protection.
//!
//! Every agent execution goes through [`SecurityManager::validate_execution_request`],
//! [`SecurityManager::acquire_execution_resources`], and exactly one call to
//! [`SecurityManager::record_execution_result`]. [`SecurityManager::execute_protected`]
//! runs the whole protocol around a caller-supplied future and guarantees the
//! third phase on every exit path.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::resource_guard::ResourceGuard;
use super::system_circuit_breaker::{RoutingDecision, SystemCircuitBreaker};
use crate::domain::models::{
    execution_id, ActiveExecution, Config, DenialKind, EmergencyShutdownStats,
    ExecutionPermission, ExecutionRequest, ExecutionResult, FailureType, ResourceHealth,
    SecurityConfig, SecurityMetrics, SecurityStatus, SystemHealth,
};
use crate::domain::ports::{MetricsSource, TimeoutManager};

const CANCELLED_MESSAGE: &str = "Execution cancelled before completion";

/// Identity of an admitted execution, handed to the body run by
/// [`SecurityManager::execute_protected`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionTicket {
    pub execution_id: String,
    /// The agent to run; the fallback when the requested agent's circuit is open
    pub agent_name: String,
    pub timeout_seconds: f64,
}

/// How a protected execution ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtectedOutcome<T> {
    Completed(T),
    Failed(String),
    Denied(String),
    /// Deadline elapsed after the given number of seconds
    TimedOut(f64),
}

impl<T> ProtectedOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
            Self::Denied(_) => "denied",
            Self::TimedOut(_) => "timed_out",
        }
    }
}

/// Composes resource admission, circuit breaking, and deadlines into one
/// request lifecycle.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct SecurityManager {
    resource_guard: Arc<ResourceGuard>,
    circuit_breaker: Arc<SystemCircuitBreaker>,
    timeout_manager: Arc<dyn TimeoutManager>,
    config: Arc<SecurityConfig>,
    active_executions: Arc<RwLock<HashMap<String, ActiveExecution>>>,
    metrics: Arc<Mutex<SecurityMetrics>>,
    /// Millisecond stamp of the last issued execution id
    last_id_millis: Arc<AtomicI64>,
}

impl SecurityManager {
    pub fn new(
        resource_guard: Arc<ResourceGuard>,
        circuit_breaker: Arc<SystemCircuitBreaker>,
        timeout_manager: Arc<dyn TimeoutManager>,
        config: SecurityConfig,
    ) -> Self {
        Self {
            resource_guard,
            circuit_breaker,
            timeout_manager,
            config: Arc::new(config),
            active_executions: Arc::new(RwLock::new(HashMap::new())),
            metrics: Arc::new(Mutex::new(SecurityMetrics::default())),
            last_id_millis: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Wire a manager from loaded configuration.
    pub fn from_config(
        config: &Config,
        source: Arc<dyn MetricsSource>,
        timeout_manager: Arc<dyn TimeoutManager>,
    ) -> Self {
        let resource_guard = ResourceGuard::with_cache_interval(
            config.resource_limits.clone(),
            source,
            seconds(config.security.usage_cache_seconds),
        );
        let circuit_breaker = SystemCircuitBreaker::new(
            config.circuit_breaker.clone(),
            config.fallback_agents.clone(),
        );

        Self::new(
            Arc::new(resource_guard),
            Arc::new(circuit_breaker),
            timeout_manager,
            config.security.clone(),
        )
    }

    pub fn resource_guard(&self) -> &ResourceGuard {
        &self.resource_guard
    }

    pub fn circuit_breaker(&self) -> &SystemCircuitBreaker {
        &self.circuit_breaker
    }

    pub fn timeout_manager(&self) -> &Arc<dyn TimeoutManager> {
        &self.timeout_manager
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Start background resource monitoring. Idempotent.
    pub async fn start(&self) {
        self.resource_guard.start_monitoring().await;
        info!("security manager started");
    }

    /// Stop background monitoring within the configured stop timeout.
    ///
    /// Returns false if the monitor had to be aborted.
    pub async fn shutdown(&self) -> bool {
        let stopped = self
            .resource_guard
            .stop_monitoring(seconds(self.config.monitor_stop_timeout_seconds))
            .await;
        info!(clean = stopped, "security manager stopped");
        stopped
    }

    /// Wall-clock instant for a new execution id, strictly after the last one.
    ///
    /// Ids embed only milliseconds, so a burst inside one millisecond is
    /// spread over the following ones.
    fn next_id_instant(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let millis = now.timestamp_millis();
        let previous = match self.last_id_millis.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |last| Some(millis.max(last + 1)),
        ) {
            Ok(previous) | Err(previous) => previous,
        };
        DateTime::from_timestamp_millis(millis.max(previous + 1)).unwrap_or(now)
    }

    /// Phase 1: decide whether `request` may run.
    ///
    /// Records a rate-limit timestamp on success but reserves nothing.
    pub async fn validate_execution_request(
        &self,
        request: &ExecutionRequest,
    ) -> ExecutionPermission {
        let id = execution_id(&request.agent_name, &request.user_id, self.next_id_instant());
        let timeout_seconds = self.config.effective_timeout(request.timeout_seconds);
        self.metrics.lock().await.validations += 1;

        if request.bypass_security {
            warn!(
                agent = %request.agent_name,
                user_id = %request.user_id,
                execution_id = %id,
                "security checks bypassed"
            );
            self.metrics.lock().await.bypasses += 1;
            return ExecutionPermission::granted(id, timeout_seconds, None);
        }

        if let Err(violation) = self
            .resource_guard
            .validate_resource_request(&request.user_id, request.estimated_memory_mb)
            .await
        {
            info!(
                agent = %request.agent_name,
                user_id = %request.user_id,
                reason = %violation,
                "execution denied by resource limits"
            );
            self.count_denial(DenialKind::Resource).await;
            return ExecutionPermission::denied(id, DenialKind::Resource, violation.to_string());
        }

        let recommended_agent = match self
            .circuit_breaker
            .can_execute_agent(&request.agent_name)
            .await
        {
            RoutingDecision::Primary => None,
            RoutingDecision::Fallback(fallback) => {
                self.metrics.lock().await.fallback_routings += 1;
                Some(fallback)
            }
            RoutingDecision::Unavailable => {
                info!(
                    agent = %request.agent_name,
                    user_id = %request.user_id,
                    "execution denied by open circuit"
                );
                self.count_denial(DenialKind::Circuit).await;
                return ExecutionPermission::denied(
                    id,
                    DenialKind::Circuit,
                    format!(
                        "Agent '{}' is currently unavailable (circuit open, no fallback available)",
                        request.agent_name
                    ),
                );
            }
        };

        debug!(
            agent = %request.agent_name,
            user_id = %request.user_id,
            execution_id = %id,
            timeout_seconds,
            fallback = recommended_agent.as_deref(),
            "execution permitted"
        );
        ExecutionPermission::granted(id, timeout_seconds, recommended_agent)
    }

    /// Phase 2: reserve a concurrency slot and register the deadline.
    ///
    /// Returns false with nothing reserved when the permission was denied,
    /// the resource guard refuses on re-validation, or the execution id is
    /// already in flight.
    pub async fn acquire_execution_resources(
        &self,
        request: &ExecutionRequest,
        permission: &ExecutionPermission,
    ) -> bool {
        if !permission.allowed {
            warn!(
                execution_id = %permission.execution_id,
                "acquire attempted with a denied permission"
            );
            return false;
        }

        if !request.bypass_security
            && !self
                .resource_guard
                .acquire_resources(&request.user_id, request.estimated_memory_mb)
                .await
        {
            self.metrics.lock().await.acquisition_failures += 1;
            return false;
        }

        let agent_name = permission.effective_agent(request).to_string();
        {
            let mut active = self.active_executions.write().await;
            if active.contains_key(&permission.execution_id) {
                drop(active);
                // Ids only carry millisecond precision
                warn!(
                    execution_id = %permission.execution_id,
                    "execution id already active, refusing duplicate"
                );
                if !request.bypass_security {
                    self.resource_guard
                        .release_resources(&request.user_id)
                        .await;
                }
                self.metrics.lock().await.acquisition_failures += 1;
                return false;
            }
            active.insert(
                permission.execution_id.clone(),
                ActiveExecution {
                    execution_id: permission.execution_id.clone(),
                    agent_name: agent_name.clone(),
                    user_id: request.user_id.clone(),
                    timeout_seconds: permission.timeout_seconds,
                    started_at: Utc::now(),
                },
            );
        }

        self.timeout_manager
            .set_timeout(&permission.execution_id, permission.timeout_seconds, &agent_name)
            .await;
        self.metrics.lock().await.acquisitions += 1;

        debug!(execution_id = %permission.execution_id, "execution resources acquired");
        true
    }

    /// Phase 3: release the slot, clear the deadline, and feed the circuit breaker.
    ///
    /// Must run once per successful acquire. Unknown or already recorded
    /// execution ids are ignored apart from clearing their deadline.
    pub async fn record_execution_result(
        &self,
        request: &ExecutionRequest,
        permission: &ExecutionPermission,
        result: ExecutionResult,
    ) {
        self.timeout_manager
            .clear_timeout(&permission.execution_id)
            .await;

        let Some(active) = self
            .active_executions
            .write()
            .await
            .remove(&permission.execution_id)
        else {
            debug!(
                execution_id = %permission.execution_id,
                "result for unknown execution ignored"
            );
            return;
        };

        if !request.bypass_security {
            self.resource_guard
                .release_resources(&request.user_id)
                .await;
        }

        // Bypassed runs skip admission but still feed the breaker.
        let failure_type = result.classified_failure();
        self.circuit_breaker
            .record_execution_result(
                &active.agent_name,
                result.success,
                failure_type,
                &result.error_message,
                Some(&request.user_id),
                request.context.clone(),
            )
            .await;

        let mut metrics = self.metrics.lock().await;
        match failure_type {
            None => metrics.successes += 1,
            Some(kind) => *metrics.failures.entry(kind).or_insert(0) += 1,
        }
        metrics.record_duration(result.duration.as_secs_f64());
        metrics.peak_memory_used_mb = metrics.peak_memory_used_mb.max(result.memory_used_mb);
        drop(metrics);

        match failure_type {
            None => debug!(
                execution_id = %active.execution_id,
                agent = %active.agent_name,
                duration_ms = result.duration.as_millis() as u64,
                "execution succeeded"
            ),
            Some(kind) => info!(
                execution_id = %active.execution_id,
                agent = %active.agent_name,
                failure_type = %kind,
                error = %result.error_message,
                "execution failed"
            ),
        }
    }

    /// Run `body` under the full protocol.
    ///
    /// The body is raced against the execution's deadline. If the returned
    /// future is dropped early or the body panics, the result is still
    /// recorded as a cancellation on a spawned task.
    pub async fn execute_protected<F, Fut, T, E>(
        &self,
        request: ExecutionRequest,
        body: F,
    ) -> ProtectedOutcome<T>
    where
        F: FnOnce(ExecutionTicket) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let permission = self.validate_execution_request(&request).await;
        if !permission.allowed {
            return ProtectedOutcome::Denied(
                permission
                    .reason
                    .unwrap_or_else(|| "Execution denied".to_string()),
            );
        }
        if !self.acquire_execution_resources(&request, &permission).await {
            return ProtectedOutcome::Denied("Resource acquisition failed".to_string());
        }

        let ticket = ExecutionTicket {
            execution_id: permission.execution_id.clone(),
            agent_name: permission.effective_agent(&request).to_string(),
            timeout_seconds: permission.timeout_seconds,
        };
        let token = self
            .timeout_manager
            .cancellation_token(&permission.execution_id)
            .await;

        let mut pending = PendingRecord::new(self.clone(), request, permission);
        let started = Instant::now();
        let deadline = seconds(ticket.timeout_seconds);
        let body = body(ticket);

        let finished = match token {
            Some(token) => tokio::select! {
                biased;
                result = body => Some(result),
                () = token.cancelled() => None,
            },
            None => tokio::time::timeout(deadline, body).await.ok(),
        };
        let elapsed = started.elapsed();

        let Some((manager, request, permission)) = pending.disarm() else {
            return ProtectedOutcome::Failed(CANCELLED_MESSAGE.to_string());
        };

        let (result, outcome) = match finished {
            Some(Ok(value)) => (
                ExecutionResult::success(elapsed),
                ProtectedOutcome::Completed(value),
            ),
            Some(Err(err)) => {
                let message = err.to_string();
                (
                    ExecutionResult::failure(message.clone(), elapsed),
                    ProtectedOutcome::Failed(message),
                )
            }
            None => {
                warn!(
                    execution_id = %permission.execution_id,
                    timeout_seconds = permission.timeout_seconds,
                    "execution deadline elapsed"
                );
                (
                    ExecutionResult::failure(
                        format!("Execution timeout after {}s", permission.timeout_seconds),
                        elapsed,
                    )
                    .with_failure_type(FailureType::Timeout),
                    ProtectedOutcome::TimedOut(permission.timeout_seconds),
                )
            }
        };

        manager
            .record_execution_result(&request, &permission, result)
            .await;
        outcome
    }

    pub async fn get_security_metrics(&self) -> SecurityMetrics {
        self.metrics.lock().await.clone()
    }

    pub async fn active_executions(&self) -> Vec<ActiveExecution> {
        let mut active: Vec<_> = self
            .active_executions
            .read()
            .await
            .values()
            .cloned()
            .collect();
        active.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        active
    }

    /// Point-in-time composite of resource, circuit, and execution state.
    pub async fn get_security_status(&self) -> SecurityStatus {
        let resources = self.resource_guard.get_resource_status().await;
        let circuits = self.circuit_breaker.get_system_status().await;
        let active_executions = self.active_executions().await;
        let metrics = self.get_security_metrics().await;

        SecurityStatus {
            overall: overall_label(resources.status, circuits.health).to_string(),
            resources,
            circuits,
            active_executions,
            metrics,
            timestamp: Utc::now(),
        }
    }

    /// Drop every deadline, slot, and breaker state, and stop monitoring.
    ///
    /// Running executions lose their slots; their later Phase 3 calls are
    /// ignored.
    pub async fn emergency_shutdown(&self, reason: &str) -> EmergencyShutdownStats {
        error!(reason, "emergency shutdown initiated");

        let timeouts_cleared = self.timeout_manager.clear_all().await;
        let active_executions_cleared = {
            let mut active = self.active_executions.write().await;
            let count = active.len();
            active.clear();
            count
        };
        let cleanup = self.resource_guard.emergency_cleanup(None).await;
        let breakers_reset = self.circuit_breaker.reset_all().await;
        self.resource_guard
            .stop_monitoring(seconds(self.config.monitor_stop_timeout_seconds))
            .await;
        self.metrics.lock().await.emergency_shutdowns += 1;

        let stats = EmergencyShutdownStats {
            reason: reason.to_string(),
            active_executions_cleared,
            timeouts_cleared,
            users_cleared: cleanup.users_cleared,
            executions_released: cleanup.executions_released,
            breakers_reset,
        };
        error!(
            reason,
            active_executions_cleared = stats.active_executions_cleared,
            executions_released = stats.executions_released,
            breakers_reset = stats.breakers_reset,
            "emergency shutdown completed"
        );
        stats
    }

    async fn count_denial(&self, kind: DenialKind) {
        *self.metrics.lock().await.denials.entry(kind).or_insert(0) += 1;
    }
}

/// Records a cancellation unless disarmed before drop.
struct PendingRecord {
    armed: Option<(SecurityManager, ExecutionRequest, ExecutionPermission)>,
    started: Instant,
}

impl PendingRecord {
    fn new(
        manager: SecurityManager,
        request: ExecutionRequest,
        permission: ExecutionPermission,
    ) -> Self {
        Self {
            armed: Some((manager, request, permission)),
            started: Instant::now(),
        }
    }

    fn disarm(&mut self) -> Option<(SecurityManager, ExecutionRequest, ExecutionPermission)> {
        self.armed.take()
    }
}

impl Drop for PendingRecord {
    fn drop(&mut self) {
        let Some((manager, request, permission)) = self.armed.take() else {
            return;
        };
        let result = ExecutionResult::failure(CANCELLED_MESSAGE, self.started.elapsed());

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    execution_id = %permission.execution_id,
                    "execution cancelled, recording result in background"
                );
                handle.spawn(async move {
                    manager
                        .record_execution_result(&request, &permission, result)
                        .await;
                });
            }
            Err(_) => error!(
                execution_id = %permission.execution_id,
                "no runtime available to record cancelled execution, resource slot leaked"
            ),
        }
    }
}

fn overall_label(resources: ResourceHealth, circuits: SystemHealth) -> &'static str {
    let resource_rank = match resources {
        ResourceHealth::Healthy => 0,
        ResourceHealth::Warning => 1,
        ResourceHealth::Critical => 3,
    };
    let circuit_rank = match circuits {
        SystemHealth::Healthy => 0,
        SystemHealth::Warning => 1,
        SystemHealth::Degraded => 2,
        SystemHealth::Critical => 3,
    };

    match resource_rank.max(circuit_rank) {
        0 => "healthy",
        1 => "warning",
        2 => "degraded",
        _ => "critical",
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::SamplingError;
    use crate::domain::models::{CircuitState, ResourceLimits, SystemSample};
    use crate::infrastructure::timeout::DeadlineTimeoutManager;

    struct IdleSource;

    impl MetricsSource for IdleSource {
        fn sample(&self) -> Result<SystemSample, SamplingError> {
            Ok(SystemSample {
                process_memory_mb: 100.0,
                system_memory_total_mb: 8192.0,
                process_cpu_percent: 1.0,
                disk_free_mb: 100_000.0,
            })
        }
    }

    fn manager_with(limits: ResourceLimits) -> SecurityManager {
        let config = Config {
            resource_limits: limits,
            ..Config::default()
        };
        SecurityManager::from_config(
            &config,
            Arc::new(IdleSource),
            Arc::new(DeadlineTimeoutManager::new()),
        )
    }

    #[tokio::test]
    async fn test_full_cycle_releases_slot_and_classifies_timeout() {
        let manager = manager_with(ResourceLimits {
            max_concurrent_per_user: 1,
            ..Default::default()
        });
        let request = ExecutionRequest::new("data", "u1");

        let permission = manager.validate_execution_request(&request).await;
        assert!(permission.allowed);
        assert!((permission.timeout_seconds - 30.0).abs() < f64::EPSILON);
        assert!(permission.execution_id.starts_with("data_u1_"));

        assert!(manager.acquire_execution_resources(&request, &permission).await);
        assert_eq!(manager.active_executions().await.len(), 1);
        assert_eq!(manager.timeout_manager().active_count().await, 1);

        manager
            .record_execution_result(
                &request,
                &permission,
                ExecutionResult::failure("Connection timeout", Duration::from_millis(10)),
            )
            .await;

        let analysis = manager.circuit_breaker().get_failure_analysis().await;
        assert_eq!(analysis.by_type.get(&FailureType::Timeout), Some(&1));
        assert!(manager.active_executions().await.is_empty());
        assert_eq!(manager.timeout_manager().active_count().await, 0);

        assert!(manager.resource_guard().acquire_resources("u1", 0.0).await);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_resource_denial_reason() {
        let manager = manager_with(ResourceLimits {
            max_memory_mb: 200.0,
            ..Default::default()
        });
        let request = ExecutionRequest::new("data", "u1").with_memory(500.0);

        let permission = manager.validate_execution_request(&request).await;
        assert!(!permission.allowed);
        assert_eq!(permission.denial, Some(DenialKind::Resource));
        assert!(permission.reason.clone().unwrap_or_default().contains("Memory limit"));
        assert!(!manager.acquire_execution_resources(&request, &permission).await);

        let metrics = manager.get_security_metrics().await;
        assert_eq!(metrics.denials.get(&DenialKind::Resource), Some(&1));
        assert_eq!(metrics.acquisitions, 0);
    }

    #[tokio::test]
    async fn test_fallback_is_recorded_against_fallback_breaker() {
        let manager = manager_with(ResourceLimits::default());
        for _ in 0..3 {
            manager
                .circuit_breaker()
                .record_execution_result("optimization", false, None, "boom", None, None)
                .await;
        }

        let request = ExecutionRequest::new("optimization", "u1");
        let permission = manager.validate_execution_request(&request).await;
        assert_eq!(permission.recommended_agent.as_deref(), Some("data"));
        assert!(manager.acquire_execution_resources(&request, &permission).await);

        manager
            .record_execution_result(&request, &permission, ExecutionResult::failure("bad input", Duration::ZERO))
            .await;

        let analysis = manager.circuit_breaker().get_failure_analysis().await;
        assert_eq!(analysis.by_agent.get("data"), Some(&1));
        assert_eq!(analysis.by_agent.get("optimization"), Some(&3));
        assert_eq!(manager.get_security_metrics().await.fallback_routings, 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_circuit_denial_without_fallback() {
        let manager = manager_with(ResourceLimits::default());
        for _ in 0..3 {
            manager
                .circuit_breaker()
                .record_execution_result("reporting", false, None, "boom", None, None)
                .await;
        }

        let permission = manager
            .validate_execution_request(&ExecutionRequest::new("reporting", "u1"))
            .await;
        assert!(!permission.allowed);
        assert_eq!(permission.denial, Some(DenialKind::Circuit));
        assert!(permission.reason.unwrap_or_default().contains("unavailable"));
    }

    #[tokio::test]
    async fn test_bypass_skips_checks_but_feeds_breaker() {
        let manager = manager_with(ResourceLimits {
            max_memory_mb: 1.0,
            ..Default::default()
        });
        let request = ExecutionRequest::new("health", "admin")
            .with_memory(1000.0)
            .bypassing_security();

        for _ in 0..3 {
            let permission = manager.validate_execution_request(&request).await;
            assert!(permission.allowed);
            assert!(manager.acquire_execution_resources(&request, &permission).await);
            manager
                .record_execution_result(&request, &permission, ExecutionResult::failure("boom", Duration::ZERO))
                .await;
        }

        assert_eq!(
            manager.circuit_breaker().agent_state("health").await,
            Some(CircuitState::Open)
        );
        let analysis = manager.circuit_breaker().get_failure_analysis().await;
        assert_eq!(analysis.total_failures, 3);
        assert_eq!(analysis.recent_failures[0].user_id.as_deref(), Some("admin"));

        // The open circuit does not gate bypassed requests
        assert!(manager.validate_execution_request(&request).await.allowed);
        assert_eq!(manager.get_security_metrics().await.bypasses, 4);
        assert!(manager.resource_guard().get_resource_status().await.user_concurrency.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_execution_is_ignored() {
        let manager = manager_with(ResourceLimits::default());
        let request = ExecutionRequest::new("data", "u1");
        let permission = ExecutionPermission::granted("never_acquired".into(), 30.0, None);

        manager
            .record_execution_result(&request, &permission, ExecutionResult::failure("boom", Duration::ZERO))
            .await;

        assert_eq!(manager.circuit_breaker().agent_state("data").await, None);
        assert_eq!(manager.get_security_metrics().await.recorded_executions(), 0);
    }

    #[tokio::test]
    async fn test_execute_protected_outcomes() {
        let manager = manager_with(ResourceLimits::default());

        let outcome = manager
            .execute_protected(ExecutionRequest::new("data", "u1"), |ticket| async move {
                Ok::<_, String>(ticket.agent_name)
            })
            .await;
        assert_eq!(outcome, ProtectedOutcome::Completed("data".to_string()));

        let outcome = manager
            .execute_protected(ExecutionRequest::new("data", "u1"), |_| async {
                Err::<(), _>("out of memory")
            })
            .await;
        assert_eq!(outcome, ProtectedOutcome::Failed("out of memory".to_string()));

        let metrics = manager.get_security_metrics().await;
        assert_eq!(metrics.successes, 1);
        assert_eq!(metrics.failures.get(&FailureType::MemoryError), Some(&1));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_execute_protected_timeout() {
        let manager = manager_with(ResourceLimits::default());
        let request = ExecutionRequest::new("data", "u1").with_timeout(0.05);

        let outcome = manager
            .execute_protected(request, |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, String>(())
            })
            .await;

        assert_eq!(outcome, ProtectedOutcome::TimedOut(0.05));
        let analysis = manager.circuit_breaker().get_failure_analysis().await;
        assert_eq!(analysis.recent_failures[0].error_message, "Execution timeout after 0.05s");
        assert!(manager.active_executions().await.is_empty());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_dropped_execution_still_released() {
        let manager = manager_with(ResourceLimits {
            max_concurrent_per_user: 1,
            ..Default::default()
        });

        let runner = manager.clone();
        let task = tokio::spawn(async move {
            runner
                .execute_protected(ExecutionRequest::new("data", "u1"), |_| async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<_, String>(())
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.active_executions().await.len(), 1);
        task.abort();
        let _ = task.await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(manager.active_executions().await.is_empty());
        let analysis = manager.circuit_breaker().get_failure_analysis().await;
        assert_eq!(analysis.recent_failures[0].error_message, CANCELLED_MESSAGE);
        assert!(manager.resource_guard().acquire_resources("u1", 0.0).await);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_burst_ids_are_distinct() {
        let manager = manager_with(ResourceLimits {
            rate_limit_per_minute: 1_000,
            ..Default::default()
        });
        let request = ExecutionRequest::new("data", "u1");

        let mut ids = std::collections::HashSet::new();
        for _ in 0..50 {
            let permission = manager.validate_execution_request(&request).await;
            assert!(permission.execution_id.starts_with("data_u1_"));
            assert!(ids.insert(permission.execution_id));
        }
    }

    #[tokio::test]
    async fn test_emergency_shutdown() {
        let manager = manager_with(ResourceLimits::default());
        for user in ["u1", "u2"] {
            let request = ExecutionRequest::new("data", user);
            let permission = manager.validate_execution_request(&request).await;
            assert!(manager.acquire_execution_resources(&request, &permission).await);
        }
        for _ in 0..3 {
            manager
                .circuit_breaker()
                .record_execution_result("optimization", false, None, "boom", None, None)
                .await;
        }

        let stats = manager.emergency_shutdown("operator request").await;
        assert_eq!(stats.active_executions_cleared, 2);
        assert_eq!(stats.timeouts_cleared, 2);
        assert_eq!(stats.executions_released, 2);
        assert_eq!(stats.breakers_reset, 2);

        assert_eq!(
            manager.circuit_breaker().agent_state("optimization").await,
            Some(CircuitState::Closed)
        );
        assert!(!manager.resource_guard().is_monitoring().await);
        assert_eq!(manager.get_security_metrics().await.emergency_shutdowns, 1);
    }

    #[tokio::test]
    async fn test_status_overall_label() {
        let manager = manager_with(ResourceLimits::default());
        let status = manager.get_security_status().await;
        assert_eq!(status.overall, "healthy");

        for _ in 0..3 {
            manager
                .circuit_breaker()
                .record_execution_result("data", false, None, "boom", None, None)
                .await;
        }
        assert_eq!(manager.get_security_status().await.overall, "critical");
    }

    #[test]
    fn test_overall_label_takes_worst() {
        assert_eq!(overall_label(ResourceHealth::Warning, SystemHealth::Healthy), "warning");
        assert_eq!(overall_label(ResourceHealth::Healthy, SystemHealth::Degraded), "degraded");
        assert_eq!(overall_label(ResourceHealth::Critical, SystemHealth::Warning), "critical");
    }
}
