use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::circuit::CircuitBreakerConfig;
use super::resource::ResourceLimits;

/// Main configuration structure for Bulwark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Resource admission limits
    #[serde(default)]
    pub resource_limits: ResourceLimits,

    /// Circuit breaker defaults applied to every agent
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Execution timeouts and bookkeeping intervals
    #[serde(default)]
    pub security: SecurityConfig,

    /// Primary agent -> fallback agent used while the primary's circuit is open
    #[serde(default = "default_fallback_agents")]
    pub fallback_agents: BTreeMap<String, String>,
}

/// Fallback routes seeded when the configuration does not name any.
pub fn default_fallback_agents() -> BTreeMap<String, String> {
    BTreeMap::from([("optimization".to_string(), "data".to_string())])
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            resource_limits: ResourceLimits::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            security: SecurityConfig::default(),
            fallback_agents: default_fallback_agents(),
        }
    }
}

/// Execution timeout policy and internal intervals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SecurityConfig {
    /// Timeout granted when a request does not ask for one
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: f64,

    /// Upper bound on any granted timeout
    #[serde(default = "default_max_timeout_seconds")]
    pub max_timeout_seconds: f64,

    /// Minimum age before the cached resource usage is re-sampled
    #[serde(default = "default_usage_cache_seconds")]
    pub usage_cache_seconds: f64,

    /// How long `shutdown` waits for the resource monitor to exit
    #[serde(default = "default_monitor_stop_timeout_seconds")]
    pub monitor_stop_timeout_seconds: f64,
}

const fn default_timeout_seconds() -> f64 {
    30.0
}

const fn default_max_timeout_seconds() -> f64 {
    300.0
}

const fn default_usage_cache_seconds() -> f64 {
    1.0
}

const fn default_monitor_stop_timeout_seconds() -> f64 {
    5.0
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: default_timeout_seconds(),
            max_timeout_seconds: default_max_timeout_seconds(),
            usage_cache_seconds: default_usage_cache_seconds(),
            monitor_stop_timeout_seconds: default_monitor_stop_timeout_seconds(),
        }
    }
}

impl SecurityConfig {
    /// `min(requested or default, max)`. Non-positive requests get the default.
    pub fn effective_timeout(&self, requested: Option<f64>) -> f64 {
        let wanted = match requested {
            Some(seconds) if seconds > 0.0 && seconds.is_finite() => seconds,
            _ => self.default_timeout_seconds,
        };
        wanted.min(self.max_timeout_seconds)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,

    /// Directory for log files (if None logs only to stdout)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Enable stdout logging
    #[serde(default = "default_true")]
    pub enable_stdout: bool,

    /// Log rotation policy for file output
    #[serde(default)]
    pub rotation: RotationPolicy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_dir: None,
            enable_stdout: true,
            rotation: RotationPolicy::default(),
        }
    }
}
