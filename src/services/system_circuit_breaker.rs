//! Registry of per-agent circuit breakers with fallback routing.

use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::circuit_breaker::AgentCircuitBreaker;
use crate::domain::models::{
    default_fallback_agents, AgentBreakerStatus, CircuitBreakerConfig, CircuitState,
    FailureAnalysis, FailureType, SystemCircuitStatus, SystemHealth,
};

/// Where an execution for a requested agent should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// The requested agent's circuit admits the execution.
    Primary,
    /// The requested agent is blocked; its fallback admits the execution.
    Fallback(String),
    /// Neither the agent nor a fallback is available.
    Unavailable,
}

impl RoutingDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Unavailable)
    }

    pub fn fallback_agent(&self) -> Option<&str> {
        match self {
            Self::Fallback(agent) => Some(agent),
            _ => None,
        }
    }
}

/// Owns one [`AgentCircuitBreaker`] per agent name, created on first reference.
///
/// All breaker transitions happen under one write lock, so every agent's
/// state machine is linearizable. Reports copy a snapshot and format it
/// after the lock is released.
pub struct SystemCircuitBreaker {
    default_config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, AgentCircuitBreaker>>,
    fallback_agents: RwLock<BTreeMap<String, String>>,
    global_failure_count: AtomicU64,
    system_degraded: AtomicBool,
}

impl SystemCircuitBreaker {
    pub fn new(
        default_config: CircuitBreakerConfig,
        fallback_agents: BTreeMap<String, String>,
    ) -> Self {
        Self {
            default_config,
            breakers: RwLock::new(HashMap::new()),
            fallback_agents: RwLock::new(fallback_agents),
            global_failure_count: AtomicU64::new(0),
            system_degraded: AtomicBool::new(false),
        }
    }

    /// Create with default configuration and the seeded fallback routes.
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default(), default_fallback_agents())
    }

    pub fn default_config(&self) -> &CircuitBreakerConfig {
        &self.default_config
    }

    /// Ensure a breaker exists for `agent_name`.
    ///
    /// The config passed on the first call for an agent is kept for that
    /// agent's lifetime; later configs are ignored.
    pub async fn get_or_create_breaker(
        &self,
        agent_name: &str,
        config: Option<CircuitBreakerConfig>,
    ) -> AgentBreakerStatus {
        let mut breakers = self.breakers.write().await;
        self.breaker_entry(&mut breakers, agent_name, config)
            .snapshot()
    }

    /// Route an execution for `agent_name`, falling back when its circuit is open.
    pub async fn can_execute_agent(&self, agent_name: &str) -> RoutingDecision {
        let fallback = self.fallback_agents.read().await.get(agent_name).cloned();
        let mut breakers = self.breakers.write().await;

        if self.breaker_entry(&mut breakers, agent_name, None).can_execute() {
            return RoutingDecision::Primary;
        }

        if let Some(fallback) = fallback {
            if self.breaker_entry(&mut breakers, &fallback, None).can_execute() {
                drop(breakers);
                warn!(
                    agent = agent_name,
                    fallback = %fallback,
                    "circuit open, routing to fallback agent (degraded mode)"
                );
                return RoutingDecision::Fallback(fallback);
            }
        }

        drop(breakers);
        info!(agent = agent_name, "circuit open and no fallback available");
        RoutingDecision::Unavailable
    }

    /// Feed an execution outcome into the agent's breaker.
    ///
    /// Failures without an explicit type are classified from `error_message`.
    pub async fn record_execution_result(
        &self,
        agent_name: &str,
        success: bool,
        failure_type: Option<FailureType>,
        error_message: &str,
        user_id: Option<&str>,
        context: Option<Value>,
    ) {
        let mut breakers = self.breakers.write().await;
        let breaker = self.breaker_entry(&mut breakers, agent_name, None);

        if success {
            breaker.record_success();
            debug!(agent = agent_name, state = %breaker.state, "execution success recorded");
        } else {
            let failure_type = failure_type.unwrap_or_else(|| FailureType::classify(error_message));
            breaker.record_failure(failure_type, error_message, user_id, context);
            debug!(
                agent = agent_name,
                failure_type = %failure_type,
                state = %breaker.state,
                "execution failure recorded"
            );
            self.global_failure_count.fetch_add(1, Ordering::Relaxed);
        }

        let (open, total) = open_and_total(&breakers);
        drop(breakers);
        self.update_degraded(open, total);
    }

    /// Snapshot of every breaker plus an overall health label.
    pub async fn get_system_status(&self) -> SystemCircuitStatus {
        let mut agents: Vec<AgentBreakerStatus> = {
            let breakers = self.breakers.read().await;
            breakers.values().map(AgentCircuitBreaker::snapshot).collect()
        };
        let fallback_agents = self.fallback_agents.read().await.clone();

        agents.sort_by(|a, b| a.agent_name.cmp(&b.agent_name));
        let total_agents = agents.len();
        let open_circuits = agents
            .iter()
            .filter(|a| a.state == CircuitState::Open)
            .count();
        let half_open_circuits = agents
            .iter()
            .filter(|a| a.state == CircuitState::HalfOpen)
            .count();

        let health = SystemHealth::from_open_ratio(open_ratio(open_circuits, total_agents));

        SystemCircuitStatus {
            health,
            system_degraded: self.update_degraded(open_circuits, total_agents),
            total_agents,
            open_circuits,
            half_open_circuits,
            global_failure_count: self.global_failure_count(),
            agents,
            fallback_agents,
            timestamp: Utc::now(),
        }
    }

    /// Every retained failure, newest first, with per-type and per-agent counts.
    pub async fn get_failure_analysis(&self) -> FailureAnalysis {
        let mut records: Vec<_> = {
            let breakers = self.breakers.read().await;
            breakers
                .values()
                .flat_map(|b| b.failure_records.iter().cloned())
                .collect()
        };
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let mut by_type = BTreeMap::new();
        let mut by_agent = BTreeMap::new();
        for record in &records {
            *by_type.entry(record.failure_type).or_insert(0) += 1;
            *by_agent.entry(record.agent_name.clone()).or_insert(0) += 1;
        }

        FailureAnalysis {
            total_failures: records.len(),
            by_type,
            by_agent,
            recent_failures: records,
        }
    }

    /// Set the fallback for `primary`, returning the replaced one.
    pub async fn add_fallback_agent(
        &self,
        primary: impl Into<String>,
        fallback: impl Into<String>,
    ) -> Option<String> {
        let primary = primary.into();
        let fallback = fallback.into();
        info!(agent = %primary, fallback = %fallback, "fallback agent registered");
        self.fallback_agents.write().await.insert(primary, fallback)
    }

    /// Remove the fallback for `primary`. Returns false if none was set.
    pub async fn remove_fallback_agent(&self, primary: &str) -> bool {
        let removed = self.fallback_agents.write().await.remove(primary).is_some();
        if removed {
            info!(agent = primary, "fallback agent removed");
        }
        removed
    }

    pub async fn fallback_agents(&self) -> BTreeMap<String, String> {
        self.fallback_agents.read().await.clone()
    }

    pub async fn agent_state(&self, agent_name: &str) -> Option<CircuitState> {
        self.breakers.read().await.get(agent_name).map(|b| b.state)
    }

    /// Force one breaker closed. Returns false for unknown agents.
    pub async fn force_reset_agent(&self, agent_name: &str) -> bool {
        let mut breakers = self.breakers.write().await;
        let Some(breaker) = breakers.get_mut(agent_name) else {
            return false;
        };
        breaker.force_reset();
        let (open, total) = open_and_total(&breakers);
        drop(breakers);
        self.update_degraded(open, total);
        true
    }

    /// Force every breaker closed and clear the global failure count.
    pub async fn reset_all(&self) -> usize {
        let mut breakers = self.breakers.write().await;
        for breaker in breakers.values_mut() {
            breaker.force_reset();
        }
        let count = breakers.len();
        drop(breakers);

        self.global_failure_count.store(0, Ordering::Relaxed);
        self.system_degraded.store(false, Ordering::Relaxed);
        warn!(breakers = count, "all circuit breakers reset");
        count
    }

    pub fn global_failure_count(&self) -> u64 {
        self.global_failure_count.load(Ordering::Relaxed)
    }

    pub fn is_system_degraded(&self) -> bool {
        self.system_degraded.load(Ordering::Relaxed)
    }

    fn breaker_entry<'a>(
        &self,
        breakers: &'a mut HashMap<String, AgentCircuitBreaker>,
        agent_name: &str,
        config: Option<CircuitBreakerConfig>,
    ) -> &'a mut AgentCircuitBreaker {
        breakers
            .entry(agent_name.to_string())
            .or_insert_with(|| {
                debug!(agent = agent_name, "circuit breaker created");
                AgentCircuitBreaker::new(
                    agent_name,
                    config.unwrap_or_else(|| self.default_config.clone()),
                )
            })
    }

    /// Degraded once at least half of the tracked breakers are open.
    fn update_degraded(&self, open: usize, total: usize) -> bool {
        let degraded = total > 0 && open * 2 >= total;
        let was = self.system_degraded.swap(degraded, Ordering::Relaxed);
        if degraded && !was {
            error!(open_circuits = open, total_agents = total, "system degraded");
        } else if !degraded && was {
            info!(open_circuits = open, total_agents = total, "system recovered from degraded state");
        }
        degraded
    }
}

fn open_and_total(breakers: &HashMap<String, AgentCircuitBreaker>) -> (usize, usize) {
    let open = breakers
        .values()
        .filter(|b| b.state == CircuitState::Open)
        .count();
    (open, breakers.len())
}

fn open_ratio(open: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        open as f64 / total as f64
    }
}
