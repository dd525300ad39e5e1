//! Common test utilities for integration tests
//!
//! Provides fake collaborators for the protection core and helpers to wire
//! a [`SecurityManager`] against them.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bulwark::domain::models::SystemSample;
use bulwark::{
    CircuitBreakerConfig, MetricsSource, ResourceGuard, ResourceLimits, SamplingError,
    SecurityConfig, SecurityManager, SystemCircuitBreaker, TimeoutManager,
};

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// A quiet host: little memory, little CPU, plenty of disk.
pub fn idle_sample() -> SystemSample {
    SystemSample {
        process_memory_mb: 128.0,
        system_memory_total_mb: 16_384.0,
        process_cpu_percent: 2.0,
        disk_free_mb: 200_000.0,
    }
}

/// Metrics source returning whatever sample was last set.
pub struct FixedMetricsSource {
    sample: Mutex<SystemSample>,
    calls: AtomicUsize,
}

impl FixedMetricsSource {
    pub fn new(sample: SystemSample) -> Arc<Self> {
        Arc::new(Self {
            sample: Mutex::new(sample),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn idle() -> Arc<Self> {
        Self::new(idle_sample())
    }

    pub fn set(&self, sample: SystemSample) {
        *self.sample.lock().unwrap() = sample;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MetricsSource for FixedMetricsSource {
    fn sample(&self) -> Result<SystemSample, SamplingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(*self.sample.lock().unwrap())
    }
}

/// Metrics source that never produces a sample.
pub struct FailingMetricsSource;

impl MetricsSource for FailingMetricsSource {
    fn sample(&self) -> Result<SystemSample, SamplingError> {
        Err(SamplingError::ProcessUnavailable("test".to_string()))
    }
}

/// One call observed by [`RecordingTimeoutManager`].
#[derive(Debug, Clone, PartialEq)]
pub enum TimeoutCall {
    Set {
        execution_id: String,
        seconds: f64,
        agent_name: String,
    },
    Clear {
        execution_id: String,
    },
}

/// Timeout manager that only records calls and never cancels anything.
#[derive(Default)]
pub struct RecordingTimeoutManager {
    calls: Mutex<Vec<TimeoutCall>>,
    registered: Mutex<BTreeMap<String, f64>>,
}

impl RecordingTimeoutManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<TimeoutCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn registered(&self) -> BTreeMap<String, f64> {
        self.registered.lock().unwrap().clone()
    }
}

#[async_trait]
impl TimeoutManager for RecordingTimeoutManager {
    async fn set_timeout(&self, execution_id: &str, seconds: f64, agent_name: &str) {
        self.calls.lock().unwrap().push(TimeoutCall::Set {
            execution_id: execution_id.to_string(),
            seconds,
            agent_name: agent_name.to_string(),
        });
        self.registered
            .lock()
            .unwrap()
            .insert(execution_id.to_string(), seconds);
    }

    async fn clear_timeout(&self, execution_id: &str) {
        self.calls.lock().unwrap().push(TimeoutCall::Clear {
            execution_id: execution_id.to_string(),
        });
        self.registered.lock().unwrap().remove(execution_id);
    }

    async fn active_count(&self) -> usize {
        self.registered.lock().unwrap().len()
    }

    async fn clear_all(&self) -> usize {
        let mut registered = self.registered.lock().unwrap();
        let count = registered.len();
        registered.clear();
        count
    }
}

/// A manager wired against fakes, plus handles to those fakes.
pub struct Harness {
    pub manager: SecurityManager,
    pub source: Arc<FixedMetricsSource>,
    pub timeouts: Arc<RecordingTimeoutManager>,
}

pub fn harness(limits: ResourceLimits, breaker: CircuitBreakerConfig) -> Harness {
    harness_with_fallbacks(limits, breaker, bulwark::domain::models::default_fallback_agents())
}

pub fn harness_with_fallbacks(
    limits: ResourceLimits,
    breaker: CircuitBreakerConfig,
    fallbacks: BTreeMap<String, String>,
) -> Harness {
    let source = FixedMetricsSource::idle();
    let timeouts = RecordingTimeoutManager::new();

    let guard = ResourceGuard::with_cache_interval(
        limits,
        Arc::clone(&source) as Arc<dyn MetricsSource>,
        Duration::ZERO,
    );
    let manager = SecurityManager::new(
        Arc::new(guard),
        Arc::new(SystemCircuitBreaker::new(breaker, fallbacks)),
        Arc::clone(&timeouts) as Arc<dyn TimeoutManager>,
        SecurityConfig::default(),
    );

    Harness {
        manager,
        source,
        timeouts,
    }
}
