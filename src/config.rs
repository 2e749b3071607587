use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CleanupError, Result};
use crate::rules::RuleSet;
use crate::scheduler::{parse_run_at, parse_weekday, Schedule};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub rules: RuleSet,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Provider search query selecting the messages to consider
    #[serde(default = "default_query")]
    pub query: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            query: default_query(),
            max_results: default_max_results(),
        }
    }
}

/// Bounded exponential backoff applied at the Gmail boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    #[serde(default)]
    pub schedule: Schedule,
    /// Local wall-clock time, "HH:MM"
    #[serde(default = "default_run_at")]
    pub run_at: String,
    /// Day used by the weekly schedule
    #[serde(default = "default_weekday")]
    pub weekday: String,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            schedule: Schedule::default(),
            run_at: default_run_at(),
            weekday: default_weekday(),
        }
    }
}

fn default_query() -> String {
    crate::pipeline::DEFAULT_QUERY.to_string()
}

fn default_max_results() -> usize {
    500
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_secs() -> u64 {
    30
}

fn default_run_at() -> String {
    "09:00".to_string()
}

fn default_weekday() -> String {
    "monday".to_string()
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CleanupError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| CleanupError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                CleanupError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| CleanupError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| CleanupError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.rules.validate()?;

        if self.scan.query.trim().is_empty() {
            return Err(CleanupError::ConfigError(
                "scan.query cannot be empty".to_string(),
            ));
        }
        if self.scan.max_results == 0 {
            return Err(CleanupError::ConfigError(
                "scan.max_results must be at least 1".to_string(),
            ));
        }

        if self.retry.initial_delay_ms == 0 {
            return Err(CleanupError::ConfigError(
                "retry.initial_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_delay_secs == 0 {
            return Err(CleanupError::ConfigError(
                "retry.max_delay_secs must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_retries > 10 {
            return Err(CleanupError::ConfigError(
                "retry.max_retries cannot exceed 10".to_string(),
            ));
        }

        parse_run_at(&self.automation.run_at)?;
        parse_weekday(&self.automation.weekday)?;

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}
