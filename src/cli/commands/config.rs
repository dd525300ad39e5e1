//! Configuration inspection commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Validate the effective configuration
    Check,
}

#[derive(Debug, Serialize)]
pub struct ConfigShowOutput {
    #[serde(flatten)]
    pub config: Config,
}

impl CommandOutput for ConfigShowOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.config)
            .unwrap_or_else(|e| format!("Failed to render configuration: {e}"))
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigCheckOutput {
    pub valid: bool,
    pub agents_with_fallback: usize,
    pub max_concurrent_global: usize,
    pub failure_threshold: u32,
    pub default_timeout_seconds: f64,
}

impl CommandOutput for ConfigCheckOutput {
    fn to_human(&self) -> String {
        format!(
            "Configuration is valid\n  global concurrency limit: {}\n  failure threshold: {}\n  default timeout: {}s\n  fallback routes: {}",
            self.max_concurrent_global,
            self.failure_threshold,
            self.default_timeout_seconds,
            self.agents_with_fallback
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: ConfigArgs, config: &Config, json_mode: bool) -> Result<()> {
    match args.command {
        ConfigCommand::Show => {
            output(
                &ConfigShowOutput {
                    config: config.clone(),
                },
                json_mode,
            );
        }
        ConfigCommand::Check => {
            ConfigLoader::validate(config).context("Configuration check failed")?;
            output(
                &ConfigCheckOutput {
                    valid: true,
                    agents_with_fallback: config.fallback_agents.len(),
                    max_concurrent_global: config.resource_limits.max_concurrent_global,
                    failure_threshold: config.circuit_breaker.failure_threshold,
                    default_timeout_seconds: config.security.default_timeout_seconds,
                },
                json_mode,
            );
        }
    }
    Ok(())
}
