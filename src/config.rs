//! TOML configuration.
//!
//! Every section is optional. A missing file is not an error for commands
//! that can run on defaults; see [`Config::minimal`].
//!
//! ```toml
//! [catalog]
//! base_url = "https://api.sap.com/odata/1.0/catalog.svc"
//! timeout_secs = 300
//!
//! [retry]
//! max_attempts = 4
//! base_delay_ms = 500
//!
//! [cache]
//! search_secs = 300
//!
//! [limits]
//! max_in_flight = 4
//!
//! [server]
//! bind = "127.0.0.1:7341"
//!
//! [logging]
//! level = "info"
//! format = "compact"
//! ```

use anyhow::{Context, Result};
use hub_catalog_core::backoff::RetryPolicy;
use hub_catalog_core::models::TtlClass;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Built-in defaults, used when no config file is present.
    pub fn minimal() -> Self {
        Self::default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-attempt timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl CatalogConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_base_url() -> String {
    "https://api.sap.com/odata/1.0/catalog.svc".to_string()
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_user_agent() -> String {
    format!("hubcat/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            jitter: self.jitter,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

fn default_max_attempts() -> u32 {
    4
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_jitter() -> f64 {
    0.2
}
fn default_max_delay_ms() -> u64 {
    10_000
}

/// Lifetime of each TTL class, in seconds.
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_package_list_secs")]
    pub package_list_secs: u64,
    #[serde(default = "default_artifact_detail_secs")]
    pub artifact_detail_secs: u64,
    #[serde(default = "default_search_secs")]
    pub search_secs: u64,
    #[serde(default = "default_metadata_secs")]
    pub metadata_secs: u64,
    /// Upper bound on stored responses; least useful entries go first.
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            package_list_secs: default_package_list_secs(),
            artifact_detail_secs: default_artifact_detail_secs(),
            search_secs: default_search_secs(),
            metadata_secs: default_metadata_secs(),
            max_entries: default_max_entries(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self, class: TtlClass) -> Duration {
        Duration::from_secs(match class {
            TtlClass::PackageList => self.package_list_secs,
            TtlClass::ArtifactDetail => self.artifact_detail_secs,
            TtlClass::Search => self.search_secs,
            TtlClass::Metadata => self.metadata_secs,
        })
    }
}

fn default_package_list_secs() -> u64 {
    TtlClass::PackageList.default_ttl().as_secs()
}
fn default_artifact_detail_secs() -> u64 {
    TtlClass::ArtifactDetail.default_ttl().as_secs()
}
fn default_search_secs() -> u64 {
    TtlClass::Search.default_ttl().as_secs()
}
fn default_metadata_secs() -> u64 {
    TtlClass::Metadata.default_ttl().as_secs()
}
fn default_max_entries() -> u64 {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    /// Simultaneous upstream HTTP attempts across all callers.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Candidates fetched for a multi-keyword search before local ranking.
    #[serde(default = "default_ranking_window")]
    pub ranking_window: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            ranking_window: default_ranking_window(),
        }
    }
}

fn default_max_in_flight() -> usize {
    4
}
fn default_ranking_window() -> u32 {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate catalog
    let base_url = config.catalog.base_url.trim();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        anyhow::bail!(
            "catalog.base_url must be an http(s) URL, got '{}'",
            config.catalog.base_url
        );
    }
    if config.catalog.timeout_secs == 0 {
        anyhow::bail!("catalog.timeout_secs must be > 0");
    }

    // Validate retry
    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be >= 1");
    }
    if config.retry.multiplier < 1.0 || !config.retry.multiplier.is_finite() {
        anyhow::bail!("retry.multiplier must be >= 1.0");
    }
    if !(0.0..=1.0).contains(&config.retry.jitter) {
        anyhow::bail!("retry.jitter must be in [0.0, 1.0]");
    }
    if config.retry.max_delay_ms < config.retry.base_delay_ms {
        anyhow::bail!("retry.max_delay_ms must be >= retry.base_delay_ms");
    }

    if config.cache.max_entries == 0 {
        anyhow::bail!("cache.max_entries must be > 0");
    }

    // Validate limits
    if config.limits.max_in_flight == 0 {
        anyhow::bail!("limits.max_in_flight must be > 0");
    }
    if config.limits.ranking_window == 0 {
        anyhow::bail!("limits.ranking_window must be > 0");
    }

    Ok(config)
}

/// Load `path` if it exists, otherwise fall back to [`Config::minimal`].
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::minimal())
    }
}
