use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{GmailError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Gmail search selecting the messages to triage
    #[serde(default = "default_query")]
    pub query: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            query: default_query(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Path of the rule script evaluated against every message
    #[serde(default = "default_script")]
    pub script: PathBuf,
    /// Upper bound on operations per evaluation; 0 means unlimited
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            script: default_script(),
            max_operations: default_max_operations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub dry_run: bool,
}

fn default_query() -> String {
    "is:unread -has:userlabels".to_string()
}

fn default_script() -> PathBuf {
    PathBuf::from("labeller.rhai")
}

fn default_max_operations() -> u64 {
    100_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    30
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
            .map_err(|e| GmailError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| GmailError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GmailError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| GmailError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scan.query.trim().is_empty() {
            return Err(GmailError::ConfigError(
                "scan.query cannot be empty".to_string(),
            ));
        }

        if self.rules.script.as_os_str().is_empty() {
            return Err(GmailError::ConfigError(
                "rules.script cannot be empty".to_string(),
            ));
        }

        if self.client.max_retries > 10 {
            return Err(GmailError::ConfigError(
                "client.max_retries cannot exceed 10".to_string(),
            ));
        }

        if self.client.request_timeout_secs == 0 {
            return Err(GmailError::ConfigError(
                "client.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}
