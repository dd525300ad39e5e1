use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::errors::ConfigError;

/// Configuration for agent circuit breakers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CircuitBreakerConfig {
    /// Failures within the window before opening the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds to keep the circuit open before probing in half-open.
    #[serde(default = "default_recovery_timeout_seconds")]
    pub recovery_timeout_seconds: f64,
    /// Successful calls in half-open needed to close the circuit.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Failures older than this are forgotten.
    #[serde(default = "default_failure_window_seconds")]
    pub failure_window_seconds: f64,
    /// Trial executions admitted per half-open episode.
    #[serde(default = "default_max_half_open_calls")]
    pub max_half_open_calls: u32,
}

const fn default_failure_threshold() -> u32 {
    3
}

const fn default_recovery_timeout_seconds() -> f64 {
    60.0
}

const fn default_success_threshold() -> u32 {
    2
}

const fn default_failure_window_seconds() -> f64 {
    300.0
}

const fn default_max_half_open_calls() -> u32 {
    3
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_seconds: default_recovery_timeout_seconds(),
            success_threshold: default_success_threshold(),
            failure_window_seconds: default_failure_window_seconds(),
            max_half_open_calls: default_max_half_open_calls(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a more sensitive circuit breaker.
    pub fn sensitive() -> Self {
        Self {
            failure_threshold: 2,
            recovery_timeout_seconds: 30.0,
            success_threshold: 1,
            failure_window_seconds: 120.0,
            max_half_open_calls: 1,
        }
    }

    /// Create a more resilient circuit breaker.
    pub fn resilient() -> Self {
        Self {
            failure_threshold: 10,
            recovery_timeout_seconds: 120.0,
            success_threshold: 3,
            failure_window_seconds: 900.0,
            max_half_open_calls: 5,
        }
    }

    pub fn recovery_timeout(&self) -> Duration {
        seconds_to_duration(self.recovery_timeout_seconds)
    }

    pub fn failure_window(&self) -> Duration {
        seconds_to_duration(self.failure_window_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, f64); 5] = [
            ("failure_threshold", f64::from(self.failure_threshold)),
            ("recovery_timeout_seconds", self.recovery_timeout_seconds),
            ("success_threshold", f64::from(self.success_threshold)),
            ("failure_window_seconds", self.failure_window_seconds),
            ("max_half_open_calls", f64::from(self.max_half_open_calls)),
        ];

        for (field, value) in checks {
            if value <= 0.0 || !value.is_finite() {
                return Err(ConfigError::InvalidCircuitBreaker { field, value });
            }
        }

        let spans = [
            ("recovery_timeout_seconds", self.recovery_timeout_seconds),
            ("failure_window_seconds", self.failure_window_seconds),
        ];
        for (field, value) in spans {
            if value > MAX_BREAKER_SPAN_SECONDS {
                return Err(ConfigError::CircuitBreakerSpanTooLong {
                    field,
                    value,
                    max: MAX_BREAKER_SPAN_SECONDS,
                });
            }
        }
        Ok(())
    }
}

/// Longest accepted recovery timeout or failure window (one year).
pub const MAX_BREAKER_SPAN_SECONDS: f64 = 365.0 * 24.0 * 3600.0;

fn seconds_to_duration(seconds: f64) -> Duration {
    Duration::try_milliseconds((seconds * 1000.0).round() as i64).unwrap_or(Duration::MAX)
}

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    Closed,
    /// Circuit is open, requests are blocked.
    Open,
    /// Circuit is testing if the agent has recovered.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    Timeout,
    Exception,
    SilentFailure,
    MemoryError,
    RateLimit,
}

impl FailureType {
    /// Infer the failure type from a free-text error message.
    ///
    /// Case-insensitive substring checks, in order: "timeout", "memory",
    /// "rate limit", then an empty/placeholder message, else `Exception`.
    pub fn classify(error_message: &str) -> Self {
        let lowered = error_message.to_lowercase();
        let trimmed = error_message.trim();

        if lowered.contains("timeout") {
            Self::Timeout
        } else if lowered.contains("memory") {
            Self::MemoryError
        } else if lowered.contains("rate limit") {
            Self::RateLimit
        } else if trimmed.is_empty() || trimmed == "..." || trimmed == "None" {
            Self::SilentFailure
        } else {
            Self::Exception
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Exception => "exception",
            Self::SilentFailure => "silent_failure",
            Self::MemoryError => "memory_error",
            Self::RateLimit => "rate_limit",
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed execution as seen by a circuit breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub timestamp: DateTime<Utc>,
    pub failure_type: FailureType,
    pub error_message: String,
    pub agent_name: String,
    pub user_id: Option<String>,
    pub context: Option<serde_json::Value>,
}

impl FailureRecord {
    pub fn new(
        agent_name: impl Into<String>,
        failure_type: FailureType,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            failure_type,
            error_message: error_message.into(),
            agent_name: agent_name.into(),
            user_id: None,
            context: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Side-effect free snapshot of one agent breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBreakerStatus {
    pub agent_name: String,
    pub state: CircuitState,
    pub failure_count: usize,
    pub success_count: u32,
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub recovery_attempts: u32,
    pub half_open_calls: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    /// Whether the next `can_execute` would admit, computed without mutating the breaker
    pub can_execute: bool,
}

/// Aggregate circuit health across all agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemHealth {
    Healthy,
    Warning,
    Degraded,
    Critical,
}

impl SystemHealth {
    /// 0% open is healthy, under 25% warning, under 50% degraded, otherwise critical.
    pub fn from_open_ratio(ratio: f64) -> Self {
        if ratio <= 0.0 {
            Self::Healthy
        } else if ratio < 0.25 {
            Self::Warning
        } else if ratio < 0.5 {
            Self::Degraded
        } else {
            Self::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Degraded => "degraded",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for SystemHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit status of the whole system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCircuitStatus {
    pub health: SystemHealth,
    pub system_degraded: bool,
    pub total_agents: usize,
    pub open_circuits: usize,
    pub half_open_circuits: usize,
    pub global_failure_count: u64,
    pub agents: Vec<AgentBreakerStatus>,
    pub fallback_agents: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

/// Failure history flattened across every breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureAnalysis {
    pub total_failures: usize,
    pub by_type: BTreeMap<FailureType, usize>,
    pub by_agent: BTreeMap<String, usize>,
    /// Newest first
    pub recent_failures: Vec<FailureRecord>,
}
