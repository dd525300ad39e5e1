//! Protection core services
//!
//! - [`UserResourceTracker`]: per-user concurrency and request-rate counters
//! - [`ResourceGuard`]: resource admission control and background monitoring
//! - [`AgentCircuitBreaker`]: failure isolation state machine for one agent
//! - [`SystemCircuitBreaker`]: per-agent breaker registry with fallback routing
//! - [`SecurityManager`]: the validate / acquire / record execution protocol

pub mod circuit_breaker;
pub mod resource_guard;
pub mod security_manager;
pub mod system_circuit_breaker;
pub mod user_resource_tracker;

pub use circuit_breaker::AgentCircuitBreaker;
pub use resource_guard::{ResourceGuard, DEFAULT_USAGE_CACHE};
pub use security_manager::{ExecutionTicket, ProtectedOutcome, SecurityManager};
pub use system_circuit_breaker::{RoutingDecision, SystemCircuitBreaker};
pub use user_resource_tracker::UserResourceTracker;
