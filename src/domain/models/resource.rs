use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::errors::{ConfigError, ViolationKind};

/// Admission limits enforced by a [`crate::services::ResourceGuard`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ResourceLimits {
    /// Process memory ceiling, including the estimate of the request being admitted
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: f64,

    /// Process CPU ceiling in percent
    #[serde(default = "default_max_cpu_percent")]
    pub max_cpu_percent: f64,

    /// Concurrent executions allowed for a single user
    #[serde(default = "default_max_concurrent_per_user")]
    pub max_concurrent_per_user: usize,

    /// Concurrent executions allowed across all users
    #[serde(default = "default_max_concurrent_global")]
    pub max_concurrent_global: usize,

    /// Requests per user within a sliding 60 second window
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,

    /// Minimum free space on the root filesystem
    #[serde(default = "default_min_disk_space_mb")]
    pub min_disk_space_mb: f64,

    /// Background monitor period
    #[serde(default = "default_check_interval_seconds")]
    pub check_interval_seconds: f64,
}

const fn default_max_memory_mb() -> f64 {
    2048.0
}

const fn default_max_cpu_percent() -> f64 {
    80.0
}

const fn default_max_concurrent_per_user() -> usize {
    10
}

const fn default_max_concurrent_global() -> usize {
    50
}

const fn default_rate_limit_per_minute() -> u32 {
    60
}

const fn default_min_disk_space_mb() -> f64 {
    1024.0
}

const fn default_check_interval_seconds() -> f64 {
    30.0
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: default_max_memory_mb(),
            max_cpu_percent: default_max_cpu_percent(),
            max_concurrent_per_user: default_max_concurrent_per_user(),
            max_concurrent_global: default_max_concurrent_global(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
            min_disk_space_mb: default_min_disk_space_mb(),
            check_interval_seconds: default_check_interval_seconds(),
        }
    }
}

impl ResourceLimits {
    /// Every limit must be strictly positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, f64); 7] = [
            ("max_memory_mb", self.max_memory_mb),
            ("max_cpu_percent", self.max_cpu_percent),
            ("max_concurrent_per_user", self.max_concurrent_per_user as f64),
            ("max_concurrent_global", self.max_concurrent_global as f64),
            ("rate_limit_per_minute", f64::from(self.rate_limit_per_minute)),
            ("min_disk_space_mb", self.min_disk_space_mb),
            ("check_interval_seconds", self.check_interval_seconds),
        ];

        for (field, value) in checks {
            if value <= 0.0 || !value.is_finite() {
                return Err(ConfigError::InvalidResourceLimit { field, value });
            }
        }
        Ok(())
    }

    /// Monitor period; falls back to the default for a non-positive or
    /// unrepresentable setting.
    pub fn check_interval(&self) -> std::time::Duration {
        std::time::Duration::try_from_secs_f64(self.check_interval_seconds)
            .ok()
            .filter(|interval| !interval.is_zero())
            .unwrap_or(std::time::Duration::from_secs(
                default_check_interval_seconds() as u64,
            ))
    }
}

/// One raw reading from a [`crate::domain::ports::MetricsSource`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemSample {
    /// Resident set size of this process
    pub process_memory_mb: f64,
    /// Total physical memory of the host
    pub system_memory_total_mb: f64,
    pub process_cpu_percent: f64,
    /// Free space on the root filesystem
    pub disk_free_mb: f64,
}

/// Point-in-time resource usage snapshot.
///
/// Recreated on every refresh and never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub memory_mb: f64,
    pub memory_percent: f64,
    pub cpu_percent: f64,
    pub disk_space_mb: f64,
    pub concurrent_executions: usize,
    pub active_users: usize,
    pub timestamp: DateTime<Utc>,
}

impl ResourceUsage {
    pub fn from_sample(
        sample: &SystemSample,
        concurrent_executions: usize,
        active_users: usize,
    ) -> Self {
        let memory_percent = if sample.system_memory_total_mb > 0.0 {
            sample.process_memory_mb / sample.system_memory_total_mb * 100.0
        } else {
            0.0
        };

        Self {
            memory_mb: sample.process_memory_mb,
            memory_percent,
            cpu_percent: sample.process_cpu_percent,
            disk_space_mb: sample.disk_free_mb,
            concurrent_executions,
            active_users,
            timestamp: Utc::now(),
        }
    }

    /// Snapshot used before the first successful sample.
    ///
    /// Reports no pressure so admission is decided by the counters alone.
    pub fn unsampled(concurrent_executions: usize, active_users: usize) -> Self {
        Self {
            memory_mb: 0.0,
            memory_percent: 0.0,
            cpu_percent: 0.0,
            disk_space_mb: f64::MAX,
            concurrent_executions,
            active_users,
            timestamp: Utc::now(),
        }
    }
}

/// Health label of the resource guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceHealth {
    Healthy,
    Warning,
    Critical,
}

impl ResourceHealth {
    /// Classify a usage-to-limit ratio.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 0.9 {
            Self::Critical
        } else if ratio >= 0.8 {
            Self::Warning
        } else {
            Self::Healthy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ResourceHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Usage-to-limit ratios derived from one [`ResourceUsage`] snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRatios {
    pub memory: f64,
    pub cpu: f64,
    pub global_concurrency: f64,
    /// `min_disk_space_mb / disk_space_mb`; at or above 1.0 the disk is below its floor
    pub disk: f64,
}

impl ResourceRatios {
    pub fn compute(usage: &ResourceUsage, limits: &ResourceLimits) -> Self {
        let disk = if usage.disk_space_mb > 0.0 {
            limits.min_disk_space_mb / usage.disk_space_mb
        } else {
            f64::INFINITY
        };

        Self {
            memory: usage.memory_mb / limits.max_memory_mb,
            cpu: usage.cpu_percent / limits.max_cpu_percent,
            global_concurrency: usage.concurrent_executions as f64
                / limits.max_concurrent_global as f64,
            disk,
        }
    }

    pub fn max(&self) -> f64 {
        [self.memory, self.cpu, self.global_concurrency, self.disk]
            .into_iter()
            .fold(0.0, f64::max)
    }
}

/// Resource guard status report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceStatusReport {
    pub status: ResourceHealth,
    pub usage: ResourceUsage,
    pub limits: ResourceLimits,
    pub ratios: ResourceRatios,
    /// Admission denials by check
    pub violations: BTreeMap<ViolationKind, u64>,
    /// Threshold crossings seen by the background monitor
    pub monitor_alerts: BTreeMap<ViolationKind, u64>,
    pub user_concurrency: BTreeMap<String, usize>,
    pub monitoring_active: bool,
}

/// Outcome of [`crate::services::ResourceGuard::emergency_cleanup`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupStats {
    pub users_cleared: usize,
    pub executions_released: usize,
    pub timestamps_cleared: usize,
}
