//! Execution deadline adapters

pub mod deadline;

pub use deadline::DeadlineTimeoutManager;
