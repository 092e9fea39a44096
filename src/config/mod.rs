//! Configuration types and TOML loading.
//!
//! The [`Config`] struct is an immutable snapshot describing enabled
//! backends, enabled providers, notification settings, database location and
//! log level. It is loaded once at startup and handed wholesale to the
//! service graph on construction and on every reconfiguration.

pub mod persist;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ids::ProviderIdentity;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub komga: Option<BackendConfig>,

    #[serde(default)]
    pub kavita: Option<BackendConfig>,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            database: DatabaseConfig::default(),
            komga: None,
            kavita: None,
            providers: ProvidersConfig::default(),
            notifications: NotificationsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_file")]
    pub file: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            file: default_database_file(),
        }
    }
}

/// Whether reset operations run inline or as a tracked background job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetMode {
    #[default]
    Sync,
    Async,
}

/// Connection settings for one media-server backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    /// Library ids owned by this backend. When non-empty this acts as an
    /// explicit routing table consulted before any owning-backend lookup.
    #[serde(default)]
    pub libraries: Vec<String>,

    #[serde(default)]
    pub reset_mode: ResetMode,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub mangadex: Option<ProviderConfig>,

    #[serde(default)]
    pub comicvine: Option<ProviderConfig>,
}

impl ProvidersConfig {
    /// Enabled providers with their configs, ordered by ascending priority
    /// (lower number queried first).
    pub fn enabled(&self) -> Vec<(ProviderIdentity, &ProviderConfig)> {
        let mut out: Vec<(ProviderIdentity, &ProviderConfig)> = [
            (ProviderIdentity::MangaDex, self.mangadex.as_ref()),
            (ProviderIdentity::ComicVine, self.comicvine.as_ref()),
        ]
        .into_iter()
        .filter_map(|(identity, cfg)| cfg.filter(|c| c.enabled).map(|c| (identity, c)))
        .collect();
        out.sort_by_key(|(_, c)| c.priority);
        out
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_priority")]
    pub priority: u32,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            priority: default_priority(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Throughput budget for one external endpoint class.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_events_per_interval")]
    pub events_per_interval: u32,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_true")]
    pub allow_burst: bool,
}

impl RateLimitConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            events_per_interval: default_events_per_interval(),
            interval_secs: default_interval_secs(),
            allow_burst: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NotificationsConfig {
    /// Webhook URLs that receive job completion / failure events as JSON.
    #[serde(default)]
    pub webhooks: Vec<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_database_file() -> PathBuf {
    PathBuf::from("./metascribe.sqlite")
}

fn default_true() -> bool {
    true
}

fn default_priority() -> u32 {
    10
}

fn default_events_per_interval() -> u32 {
    60
}

fn default_interval_secs() -> u64 {
    60
}

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from the given path, or return defaults when no path is set.
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    match custom_path {
        Some(path) => load_config(path),
        None => Ok(Config::default()),
    }
}

/// Validate cross-field constraints that serde defaults cannot express.
pub fn validate_config(config: &Config) -> Result<()> {
    for (name, backend) in [("komga", &config.komga), ("kavita", &config.kavita)] {
        if let Some(backend) = backend {
            if backend.base_url.trim().is_empty() {
                anyhow::bail!("{name}.base_url must not be empty");
            }
        }
    }

    for (identity, provider) in config.providers.enabled() {
        if provider.rate_limit.events_per_interval == 0 {
            anyhow::bail!("providers.{identity}.rate_limit.events_per_interval must be positive");
        }
        if provider.rate_limit.interval_secs == 0 {
            anyhow::bail!("providers.{identity}.rate_limit.interval_secs must be positive");
        }
    }

    Ok(())
}
