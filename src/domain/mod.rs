//! Domain layer for the Bulwark protection core
//!
//! Value types, error enums, and the port traits that external
//! collaborators implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{ConfigError, ResourceViolation, SamplingError, ViolationKind};
