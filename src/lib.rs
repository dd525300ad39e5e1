//! Bulwark - execution protection for agent orchestration
//!
//! Bulwark sits between an agent dispatcher and the agents it runs. Every
//! execution is admitted against resource limits, routed around agents whose
//! circuit is open, given a deadline, and reported back so failures feed the
//! circuit breakers and resource slots are always returned.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Value types, errors, and port traits
//! - **Service Layer** (`services`): Resource guard, circuit breakers, security manager
//! - **Infrastructure Layer** (`infrastructure`): Config, logging, metrics, and deadline adapters
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use bulwark::{Config, DeadlineTimeoutManager, ExecutionRequest, SecurityManager, SysinfoMetricsSource};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = SecurityManager::from_config(
//!         &Config::default(),
//!         Arc::new(SysinfoMetricsSource::new()?),
//!         Arc::new(DeadlineTimeoutManager::new()),
//!     );
//!
//!     let outcome = manager
//!         .execute_protected(ExecutionRequest::new("data", "user-1"), |ticket| async move {
//!             Ok::<_, String>(format!("ran {}", ticket.agent_name))
//!         })
//!         .await;
//!     println!("{}", outcome.label());
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::models::{
    CircuitBreakerConfig, CircuitState, Config, ExecutionPermission, ExecutionRequest,
    ExecutionResult, FailureType, ResourceLimits, SecurityConfig,
};
pub use domain::ports::{MetricsSource, TimeoutManager};
pub use domain::{ConfigError, ResourceViolation, SamplingError};
pub use infrastructure::config::ConfigLoader;
pub use infrastructure::metrics::SysinfoMetricsSource;
pub use infrastructure::timeout::DeadlineTimeoutManager;
pub use services::{
    AgentCircuitBreaker, ProtectedOutcome, ResourceGuard, RoutingDecision, SecurityManager,
    SystemCircuitBreaker, UserResourceTracker,
};
