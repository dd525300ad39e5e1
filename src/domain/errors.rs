//! Domain errors for the Bulwark protection core.
//!
//! Admission denials are ordinary values ([`ResourceViolation`]); they are never
//! raised as panics or propagated with `?` through the dispatcher. Sampling and
//! configuration failures have their own error types.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Category of a resource admission violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    GlobalConcurrency,
    UserConcurrency,
    RateLimit,
    Memory,
    Cpu,
    Disk,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GlobalConcurrency => "global_concurrency",
            Self::UserConcurrency => "user_concurrency",
            Self::RateLimit => "rate_limit",
            Self::Memory => "memory",
            Self::Cpu => "cpu",
            Self::Disk => "disk",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource admission check that failed.
///
/// The `Display` output is the human-readable denial reason surfaced to callers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResourceViolation {
    #[error("Global concurrent execution limit exceeded ({current}/{limit})")]
    GlobalConcurrency { current: usize, limit: usize },

    #[error("User concurrent execution limit exceeded ({current}/{limit})")]
    UserConcurrency { current: usize, limit: usize },

    #[error("Rate limit exceeded ({current}/{limit} requests per minute)")]
    RateLimit { current: usize, limit: u32 },

    #[error("Memory limit would be exceeded ({projected_mb:.1}MB > {limit_mb:.1}MB)")]
    Memory { projected_mb: f64, limit_mb: f64 },

    #[error("CPU usage too high ({current_percent:.1}% > {limit_percent:.1}%)")]
    Cpu {
        current_percent: f64,
        limit_percent: f64,
    },

    #[error("Insufficient disk space ({available_mb:.1}MB < {required_mb:.1}MB)")]
    Disk { available_mb: f64, required_mb: f64 },
}

impl ResourceViolation {
    pub fn kind(&self) -> ViolationKind {
        match self {
            Self::GlobalConcurrency { .. } => ViolationKind::GlobalConcurrency,
            Self::UserConcurrency { .. } => ViolationKind::UserConcurrency,
            Self::RateLimit { .. } => ViolationKind::RateLimit,
            Self::Memory { .. } => ViolationKind::Memory,
            Self::Cpu { .. } => ViolationKind::Cpu,
            Self::Disk { .. } => ViolationKind::Disk,
        }
    }
}

/// Failure to read process or system metrics.
#[derive(Debug, Error)]
pub enum SamplingError {
    #[error("Current process could not be resolved: {0}")]
    ProcessUnavailable(String),

    #[error("No disk information available")]
    NoDisk,

    #[error("Metrics sampling task failed: {0}")]
    TaskFailed(String),
}

/// Configuration error types
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid resource limit {field}: {value}. Must be greater than 0")]
    InvalidResourceLimit { field: &'static str, value: f64 },

    #[error("Invalid circuit breaker setting {field}: {value}. Must be greater than 0")]
    InvalidCircuitBreaker { field: &'static str, value: f64 },

    #[error("Invalid circuit breaker setting {field}: {value}. Must not exceed {max} seconds")]
    CircuitBreakerSpanTooLong {
        field: &'static str,
        value: f64,
        max: f64,
    },

    #[error("Invalid timeout {field}: {value}. Must be greater than 0")]
    InvalidTimeout { field: &'static str, value: f64 },

    #[error(
        "Invalid timeout configuration: default_timeout_seconds ({0}) must not exceed max_timeout_seconds ({1})"
    )]
    TimeoutOrdering(f64, f64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid fallback mapping: agent '{0}' cannot fall back to itself")]
    SelfFallback(String),

    #[error("Invalid fallback mapping: agent names cannot be empty")]
    EmptyAgentName,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_messages() {
        let v = ResourceViolation::UserConcurrency {
            current: 10,
            limit: 10,
        };
        assert_eq!(v.to_string(), "User concurrent execution limit exceeded (10/10)");
        assert_eq!(v.kind(), ViolationKind::UserConcurrency);

        let v = ResourceViolation::RateLimit {
            current: 60,
            limit: 60,
        };
        assert!(v.to_string().starts_with("Rate limit exceeded"));
    }

    #[test]
    fn test_violation_kind_as_str() {
        assert_eq!(ViolationKind::GlobalConcurrency.as_str(), "global_concurrency");
        assert_eq!(ViolationKind::Disk.to_string(), "disk");
    }
}
