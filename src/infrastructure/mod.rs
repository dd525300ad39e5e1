//! Infrastructure layer module
//!
//! Adapters and bootstrap concerns around the protection core:
//! - Configuration management
//! - Logging infrastructure
//! - Process and host metrics sampling
//! - Execution deadlines
//!
//! Infrastructure implementations satisfy the port traits defined in the domain layer.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod timeout;
