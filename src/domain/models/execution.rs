use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::circuit::{FailureType, SystemCircuitStatus};
use super::resource::ResourceStatusReport;

/// One request to run an agent on behalf of a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub agent_name: String,
    pub user_id: String,
    pub estimated_memory_mb: f64,
    /// Requested deadline; the configured default applies when absent
    pub timeout_seconds: Option<f64>,
    pub context: Option<serde_json::Value>,
    /// Skip every admission check. Reserved for health and emergency paths.
    pub bypass_security: bool,
}

impl ExecutionRequest {
    pub fn new(agent_name: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            user_id: user_id.into(),
            estimated_memory_mb: 0.0,
            timeout_seconds: None,
            context: None,
            bypass_security: false,
        }
    }

    pub fn with_memory(mut self, estimated_memory_mb: f64) -> Self {
        self.estimated_memory_mb = estimated_memory_mb;
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: f64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn bypassing_security(mut self) -> Self {
        self.bypass_security = true;
        self
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    Resource,
    Circuit,
}

/// Result of validating an [`ExecutionRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPermission {
    pub allowed: bool,
    pub reason: Option<String>,
    pub denial: Option<DenialKind>,
    /// Fallback agent to run instead of the requested one
    pub recommended_agent: Option<String>,
    pub timeout_seconds: f64,
    /// `{agent}_{user}_{epoch_ms}`; correlates acquire, record, and timeout registration
    pub execution_id: String,
}

impl ExecutionPermission {
    pub fn granted(
        execution_id: String,
        timeout_seconds: f64,
        recommended_agent: Option<String>,
    ) -> Self {
        Self {
            allowed: true,
            reason: None,
            denial: None,
            recommended_agent,
            timeout_seconds,
            execution_id,
        }
    }

    pub fn denied(execution_id: String, kind: DenialKind, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            denial: Some(kind),
            recommended_agent: None,
            timeout_seconds: 0.0,
            execution_id,
        }
    }

    /// The agent whose breaker is exercised by this execution.
    pub fn effective_agent<'a>(&'a self, request: &'a ExecutionRequest) -> &'a str {
        self.recommended_agent
            .as_deref()
            .unwrap_or(&request.agent_name)
    }
}

/// What the caller reports back in Phase 3.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    pub error_message: String,
    /// Overrides classification from `error_message`
    pub failure_type: Option<FailureType>,
    pub duration: std::time::Duration,
    pub memory_used_mb: f64,
}

impl ExecutionResult {
    pub fn success(duration: std::time::Duration) -> Self {
        Self {
            success: true,
            error_message: String::new(),
            failure_type: None,
            duration,
            memory_used_mb: 0.0,
        }
    }

    pub fn failure(error_message: impl Into<String>, duration: std::time::Duration) -> Self {
        Self {
            success: false,
            error_message: error_message.into(),
            failure_type: None,
            duration,
            memory_used_mb: 0.0,
        }
    }

    pub fn with_failure_type(mut self, failure_type: FailureType) -> Self {
        self.failure_type = Some(failure_type);
        self
    }

    pub fn with_memory_used(mut self, memory_used_mb: f64) -> Self {
        self.memory_used_mb = memory_used_mb;
        self
    }

    /// The explicit failure type, or one inferred from the message.
    pub fn classified_failure(&self) -> Option<FailureType> {
        if self.success {
            return None;
        }
        Some(
            self.failure_type
                .unwrap_or_else(|| FailureType::classify(&self.error_message)),
        )
    }
}

/// Build an execution id in the `{agent}_{user}_{epoch_ms}` format.
pub fn execution_id(agent_name: &str, user_id: &str, at: DateTime<Utc>) -> String {
    format!("{agent_name}_{user_id}_{}", at.timestamp_millis())
}

/// An execution between acquire and record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveExecution {
    pub execution_id: String,
    pub agent_name: String,
    pub user_id: String,
    pub timeout_seconds: f64,
    pub started_at: DateTime<Utc>,
}

/// Counters kept by the security manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityMetrics {
    pub validations: u64,
    pub denials: BTreeMap<DenialKind, u64>,
    pub bypasses: u64,
    pub fallback_routings: u64,
    pub acquisitions: u64,
    pub acquisition_failures: u64,
    pub successes: u64,
    pub failures: BTreeMap<FailureType, u64>,
    pub total_duration_seconds: f64,
    pub average_duration_seconds: f64,
    pub peak_memory_used_mb: f64,
    pub emergency_shutdowns: u64,
}

impl SecurityMetrics {
    pub fn recorded_executions(&self) -> u64 {
        self.successes + self.failures.values().sum::<u64>()
    }

    pub fn record_duration(&mut self, seconds: f64) {
        self.total_duration_seconds += seconds;
        let count = self.recorded_executions();
        if count > 0 {
            self.average_duration_seconds = self.total_duration_seconds / count as f64;
        }
    }
}

/// Composite operational view of the protection core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityStatus {
    /// Worst of the resource status and the circuit health
    pub overall: String,
    pub resources: ResourceStatusReport,
    pub circuits: SystemCircuitStatus,
    pub active_executions: Vec<ActiveExecution>,
    pub metrics: SecurityMetrics,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of [`crate::services::SecurityManager::emergency_shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyShutdownStats {
    pub reason: String,
    pub active_executions_cleared: usize,
    pub timeouts_cleared: usize,
    pub users_cleared: usize,
    pub executions_released: usize,
    pub breakers_reset: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_execution_id_format() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(execution_id("data", "u1", at), "data_u1_1700000000123");
    }

    #[test]
    fn test_effective_agent() {
        let request = ExecutionRequest::new("optimization", "u1");
        let plain = ExecutionPermission::granted("id".into(), 30.0, None);
        assert_eq!(plain.effective_agent(&request), "optimization");

        let fallback = ExecutionPermission::granted("id".into(), 30.0, Some("data".into()));
        assert_eq!(fallback.effective_agent(&request), "data");
    }

    #[test]
    fn test_average_duration() {
        let mut metrics = SecurityMetrics::default();
        metrics.successes = 1;
        metrics.record_duration(2.0);
        *metrics.failures.entry(FailureType::Timeout).or_default() += 1;
        metrics.record_duration(4.0);
        assert!((metrics.average_duration_seconds - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_result_classification() {
        let ok = ExecutionResult::success(std::time::Duration::from_millis(5));
        assert_eq!(ok.classified_failure(), None);

        let failed = ExecutionResult::failure("Connection timeout", std::time::Duration::ZERO);
        assert_eq!(failed.classified_failure(), Some(FailureType::Timeout));

        let forced = ExecutionResult::failure("boom", std::time::Duration::ZERO)
            .with_failure_type(FailureType::MemoryError);
        assert_eq!(forced.classified_failure(), Some(FailureType::MemoryError));
    }

    #[test]
    fn test_request_builders() {
        let request = ExecutionRequest::new("data", "u1")
            .with_memory(128.0)
            .with_timeout(45.0)
            .bypassing_security();
        assert!(request.bypass_security);
        assert_eq!(request.timeout_seconds, Some(45.0));
        assert!((request.estimated_memory_mb - 128.0).abs() < f64::EPSILON);
    }
}
