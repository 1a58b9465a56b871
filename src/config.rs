use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::core::models::DEFAULT_SUBNET_PREFIX;

/// Environment variable naming an alternative settings file.
pub const CONFIG_PATH_ENV: &str = "ROBOBAK_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "robobak.toml";
const ENV_PREFIX: &str = "ROBOBAK_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// JSON file holding saved job definitions.
    pub jobs_file: PathBuf,
    /// Append-only log of failed devices.
    pub error_log: PathBuf,
    /// Prefix for short-form robot addresses.
    pub subnet_prefix: String,
    /// Decide retries automatically instead of asking.
    pub headless: bool,
    pub connect_timeout_secs: u64,
    pub probe_timeout_ms: u64,
    pub verbose: bool,
    pub log_json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            jobs_file: PathBuf::from("job_configs.json"),
            error_log: PathBuf::from("error_log.txt"),
            subnet_prefix: DEFAULT_SUBNET_PREFIX.to_string(),
            headless: false,
            connect_timeout_secs: 30,
            probe_timeout_ms: 1000,
            verbose: false,
            log_json: false,
        }
    }
}

impl AppConfig {
    /// Layer defaults, the settings file, `ROBOBAK_*` environment variables
    /// and finally `overrides` (typically the parsed CLI flags).
    pub fn new<T: Serialize>(file: Option<&Path>, overrides: Option<&T>) -> Result<Self> {
        let file = file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(&file))
            .merge(Env::prefixed(ENV_PREFIX));
        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        figment
            .extract()
            .with_context(|| format!("Failed to load configuration ({})", file.display()))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}
