pub mod circuit;
pub mod config;
pub mod execution;
pub mod resource;

pub use circuit::{
    AgentBreakerStatus, CircuitBreakerConfig, CircuitState, FailureAnalysis, FailureRecord,
    FailureType, SystemCircuitStatus, SystemHealth,
};
pub use config::{
    default_fallback_agents, Config, LogFormat, LoggingConfig, RotationPolicy, SecurityConfig,
};
pub use execution::{
    execution_id, ActiveExecution, DenialKind, EmergencyShutdownStats, ExecutionPermission,
    ExecutionRequest, ExecutionResult, SecurityMetrics, SecurityStatus,
};
pub use resource::{
    CleanupStats, ResourceHealth, ResourceLimits, ResourceRatios, ResourceStatusReport,
    ResourceUsage, SystemSample,
};
