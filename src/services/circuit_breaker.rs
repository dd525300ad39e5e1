//! Per-agent circuit breaker.
//!
//! Tracks failures of one agent inside a sliding window and halts routing to
//! it once they pile up, probing for recovery with a bounded number of trial
//! executions.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::domain::models::{
    AgentBreakerStatus, CircuitBreakerConfig, CircuitState, FailureRecord, FailureType,
};

/// Circuit breaker state for a single agent.
///
/// Not synchronized; [`super::SystemCircuitBreaker`] serializes access.
#[derive(Debug, Clone)]
pub struct AgentCircuitBreaker {
    agent_name: String,
    config: CircuitBreakerConfig,
    /// Current state.
    pub state: CircuitState,
    /// Failures within the window, oldest first.
    pub failure_records: Vec<FailureRecord>,
    /// Successes since the breaker last entered closed, open, or half-open.
    pub success_count: u32,
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    /// Times the breaker moved from open to half-open.
    pub recovery_attempts: u32,
    /// Trial executions admitted in the current half-open episode.
    pub half_open_calls: u32,
}

impl AgentCircuitBreaker {
    /// Create a closed breaker.
    pub fn new(agent_name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            agent_name: agent_name.into(),
            config,
            state: CircuitState::Closed,
            failure_records: Vec::new(),
            success_count: 0,
            total_requests: 0,
            blocked_requests: 0,
            opened_at: None,
            last_failure_time: None,
            last_success_time: None,
            recovery_attempts: 0,
            half_open_calls: 0,
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Decide whether one execution may run now. Counts every call.
    pub fn can_execute(&mut self) -> bool {
        self.can_execute_at(Utc::now())
    }

    pub(crate) fn can_execute_at(&mut self, now: DateTime<Utc>) -> bool {
        self.total_requests += 1;

        match self.state {
            CircuitState::Closed => {
                if self.recent_failure_count(now) >= self.config.failure_threshold as usize {
                    self.open(now);
                    self.blocked_requests += 1;
                    false
                } else {
                    true
                }
            }
            CircuitState::Open => {
                if self.recovery_elapsed(now) {
                    self.half_open();
                    self.admit_trial()
                } else {
                    self.blocked_requests += 1;
                    false
                }
            }
            CircuitState::HalfOpen => self.admit_trial(),
        }
    }

    /// Record a successful execution.
    pub fn record_success(&mut self) {
        self.record_success_at(Utc::now());
    }

    pub(crate) fn record_success_at(&mut self, now: DateTime<Utc>) {
        self.success_count += 1;
        self.last_success_time = Some(now);

        if self.state == CircuitState::HalfOpen
            && self.success_count >= self.config.success_threshold
        {
            self.close();
        }

        self.prune(now);
    }

    /// Record a failed execution.
    pub fn record_failure(
        &mut self,
        failure_type: FailureType,
        error_message: impl Into<String>,
        user_id: Option<&str>,
        context: Option<serde_json::Value>,
    ) {
        let mut record = FailureRecord::new(self.agent_name.clone(), failure_type, error_message);
        record.user_id = user_id.map(str::to_string);
        record.context = context;
        self.record_failure_record(record);
    }

    /// Record a prepared failure.
    ///
    /// Pruning and the transition are evaluated at the later of now and the
    /// record's timestamp.
    pub fn record_failure_record(&mut self, record: FailureRecord) {
        let now = Utc::now().max(record.timestamp);
        self.last_failure_time = Some(record.timestamp);
        self.failure_records.push(record);
        self.prune(now);

        match self.state {
            CircuitState::Closed => {
                if self.recent_failure_count(now) >= self.config.failure_threshold as usize {
                    self.open(now);
                }
            }
            // Any failure during probation reopens the circuit
            CircuitState::HalfOpen => self.open(now),
            CircuitState::Open => {}
        }
    }

    /// Administrative reset: closed, with every counter zeroed.
    pub fn force_reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_records.clear();
        self.success_count = 0;
        self.total_requests = 0;
        self.blocked_requests = 0;
        self.opened_at = None;
        self.recovery_attempts = 0;
        self.half_open_calls = 0;
        info!(agent = %self.agent_name, "circuit breaker force reset");
    }

    /// Failures newer than the window start.
    pub fn recent_failure_count(&self, now: DateTime<Utc>) -> usize {
        let cutoff = self.window_start(now);
        self.failure_records
            .iter()
            .filter(|f| f.timestamp > cutoff)
            .count()
    }

    /// Whether `can_execute` would admit right now, without touching any counter.
    pub fn would_allow(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            CircuitState::Closed => {
                self.recent_failure_count(now) < self.config.failure_threshold as usize
            }
            CircuitState::Open => {
                self.recovery_elapsed(now) && self.config.max_half_open_calls > 0
            }
            CircuitState::HalfOpen => self.half_open_calls < self.config.max_half_open_calls,
        }
    }

    pub fn snapshot(&self) -> AgentBreakerStatus {
        let now = Utc::now();
        AgentBreakerStatus {
            agent_name: self.agent_name.clone(),
            state: self.state,
            failure_count: self.recent_failure_count(now),
            success_count: self.success_count,
            total_requests: self.total_requests,
            blocked_requests: self.blocked_requests,
            recovery_attempts: self.recovery_attempts,
            half_open_calls: self.half_open_calls,
            opened_at: self.opened_at,
            last_failure_time: self.last_failure_time,
            last_success_time: self.last_success_time,
            can_execute: self.would_allow(now),
        }
    }

    fn recovery_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.opened_at
            .is_some_and(|opened_at| now - opened_at > self.config.recovery_timeout())
    }

    fn admit_trial(&mut self) -> bool {
        if self.half_open_calls < self.config.max_half_open_calls {
            self.half_open_calls += 1;
            true
        } else {
            self.blocked_requests += 1;
            false
        }
    }

    /// Start of the failure window; a window reaching past the earliest
    /// representable instant has no cutoff.
    fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.config.failure_window())
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = self.window_start(now);
        self.failure_records.retain(|f| f.timestamp > cutoff);
    }

    fn open(&mut self, now: DateTime<Utc>) {
        let from = self.state;
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.success_count = 0;
        self.half_open_calls = 0;
        warn!(
            agent = %self.agent_name,
            from = %from,
            failures = self.failure_records.len(),
            "circuit opened"
        );
    }

    fn half_open(&mut self) {
        self.state = CircuitState::HalfOpen;
        self.recovery_attempts += 1;
        self.half_open_calls = 0;
        self.success_count = 0;
        info!(
            agent = %self.agent_name,
            recovery_attempts = self.recovery_attempts,
            "circuit half-open, probing recovery"
        );
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.half_open_calls = 0;
        self.failure_records.clear();
        info!(agent = %self.agent_name, "circuit closed after recovery");
    }
}
