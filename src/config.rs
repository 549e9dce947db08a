use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub const CONFIG_ENV: &str = "WVBRIDGE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read bridge config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid blank url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Upper bound on waiting for the ui loop to signal readiness.
    pub init_timeout_ms: u64,
    /// Page loaded when navigation is asked for an empty url.
    pub blank_url: String,
    pub thread_name: String,
    /// Maximum number of tasks run by a single drain on close.
    pub drain_limit: usize,
    pub log_filter: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            init_timeout_ms: 5_000,
            blank_url: "about:blank".to_string(),
            thread_name: "wvbridge-ui".to_string(),
            drain_limit: 1024,
            log_filter: "info".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = match config_path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)?;
                serde_yaml::from_str::<BridgeConfig>(&contents)?
            }
            _ => BridgeConfig::default(),
        };
        Url::parse(&config.blank_url)?;
        Ok(config)
    }

    /// Loads from `$WVBRIDGE_CONFIG`, else the per-user config directory.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .or_else(default_config_path);
        Self::load(path)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "wvbridge", "wvbridge")
        .map(|dirs| dirs.config_dir().join("bridge.yaml"))
}
