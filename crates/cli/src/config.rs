//! CLI configuration

use ludus_common::TrackerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI configuration, stored as TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Ludus API base URL
    pub api_base_url: String,

    /// API key sent as `X-API-Key`
    pub api_key: Option<String>,

    /// Accept the self-signed certificate Ludus servers ship with
    pub insecure_tls: bool,

    /// Per-request timeout
    pub request_timeout_secs: u64,

    /// Polling policy for deploy and range watches
    pub polling: TrackerConfig,

    /// Polling policy for template builds
    pub template_polling: TrackerConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://127.0.0.1:8080".to_string(),
            api_key: None,
            insecure_tls: false,
            request_timeout_secs: 30,
            polling: TrackerConfig::default(),
            template_polling: TrackerConfig::build_status(),
        }
    }
}

impl CliConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_base_url.trim().is_empty() {
            anyhow::bail!("api_base_url must not be empty");
        }
        self.polling.validate()?;
        self.template_polling.validate()?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        ludus_common::default_config_path()
    }
}
