//! Port trait definitions (Hexagonal Architecture)
//!
//! Interfaces the protection core consumes from its surroundings:
//! - MetricsSource: process and host resource readings
//! - TimeoutManager: per-execution deadline registration and cancellation
//!
//! Adapters live in `crate::infrastructure`; tests substitute their own.

pub mod metrics_source;
pub mod timeout_manager;

pub use metrics_source::MetricsSource;
pub use timeout_manager::TimeoutManager;
