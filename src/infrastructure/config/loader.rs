use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;

pub use crate::domain::errors::ConfigError;
use crate::domain::models::Config;

/// Project-local configuration directory
pub const CONFIG_DIR: &str = ".bulwark";

/// Prefix of environment overrides; `__` separates nested keys
pub const ENV_PREFIX: &str = "BULWARK_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .bulwark/config.yaml
    /// 3. .bulwark/local.yaml (optional local overrides)
    /// 4. Environment variables (BULWARK_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(".")
    }

    /// Same as [`ConfigLoader::load`] with `.bulwark/` resolved under `root`.
    pub fn load_from_dir(root: impl AsRef<Path>) -> Result<Config> {
        let dir = root.as_ref().join(CONFIG_DIR);
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// Environment overrides still apply on top of the file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        config.resource_limits.validate()?;
        config.circuit_breaker.validate()?;

        let security = &config.security;
        let timeouts = [
            ("default_timeout_seconds", security.default_timeout_seconds),
            ("max_timeout_seconds", security.max_timeout_seconds),
            ("usage_cache_seconds", security.usage_cache_seconds),
            (
                "monitor_stop_timeout_seconds",
                security.monitor_stop_timeout_seconds,
            ),
        ];
        for (field, value) in timeouts {
            if value <= 0.0 || !value.is_finite() {
                return Err(ConfigError::InvalidTimeout { field, value });
            }
        }
        if security.default_timeout_seconds > security.max_timeout_seconds {
            return Err(ConfigError::TimeoutOrdering(
                security.default_timeout_seconds,
                security.max_timeout_seconds,
            ));
        }

        if !VALID_LOG_LEVELS.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        for (primary, fallback) in &config.fallback_agents {
            if primary.trim().is_empty() || fallback.trim().is_empty() {
                return Err(ConfigError::EmptyAgentName);
            }
            if primary == fallback {
                return Err(ConfigError::SelfFallback(primary.clone()));
            }
        }

        Ok(())
    }
}
