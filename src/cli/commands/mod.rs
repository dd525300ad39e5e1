pub mod config;
pub mod simulate;
pub mod status;

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::domain::models::Config;
use crate::infrastructure::metrics::SysinfoMetricsSource;
use crate::infrastructure::timeout::DeadlineTimeoutManager;
use crate::services::SecurityManager;

/// Wire a [`SecurityManager`] against the host's real metrics.
pub(crate) fn build_manager(config: &Config) -> Result<SecurityManager> {
    let source = SysinfoMetricsSource::new().context("Failed to initialize metrics source")?;
    Ok(SecurityManager::from_config(
        config,
        Arc::new(source),
        Arc::new(DeadlineTimeoutManager::new()),
    ))
}
