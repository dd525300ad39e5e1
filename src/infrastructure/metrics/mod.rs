//! Process and host metrics adapters

pub mod sysinfo_source;

pub use sysinfo_source::SysinfoMetricsSource;
