use jiff::tz::{Offset, TimeZone};
use serde::Deserialize;
use std::fs;
use time::UtcOffset;

use crate::accrual::{IntegrationMethod, RollbackPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind_addr: String,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    pub auth_bearer_token: Option<String>,
}

fn default_channel_capacity() -> usize {
    256
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    File,
    Pgwire,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// Snapshot directory for the file store.
    #[serde(default = "default_store_dir")]
    pub dir: String,
    pub uri: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_store_dir() -> String {
    "state".to_string()
}

fn default_max_connections() -> u32 {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::File,
            dir: default_store_dir(),
            uri: None,
            max_connections: default_max_connections(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

/// One configured cost sensor group. Exactly one of `energy_feed` and
/// `power_feed` must be set; this is checked when sensors are planned.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    pub price_feed: String,
    pub energy_feed: Option<String>,
    pub power_feed: Option<String>,
    #[serde(default = "default_intervals")]
    pub intervals: Vec<String>,
    #[serde(default)]
    pub rollback: RollbackPolicy,
    #[serde(default)]
    pub integration: IntegrationMethod,
}

fn default_intervals() -> Vec<String> {
    vec!["daily".into(), "monthly".into(), "yearly".into()]
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// IANA zone for local calendar boundaries, e.g. `Europe/Stockholm`.
    pub time_zone: Option<String>,
    /// Fixed offset used when no `time_zone` is set, e.g. `+01:00`.
    pub utc_offset: Option<String>,
    pub http: HttpConfig,
    #[serde(default)]
    pub store: StoreConfig,
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid utc_offset '{0}', expected [+|-]HH:MM")]
    Offset(String),
    #[error("unknown time_zone '{name}': {source}")]
    TimeZone {
        name: String,
        #[source]
        source: jiff::Error,
    },
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        use std::env;

        let path = env::var("COST_CONFIG").unwrap_or_else(|_| "cost-config.toml".to_string());
        let contents =
            fs::read_to_string(&path).map_err(|source| ConfigError::Read { path, source })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.time_zone()?;
        Ok(cfg)
    }

    /// Parsed `utc_offset`, `None` when not configured.
    pub fn local_offset(&self) -> Result<Option<UtcOffset>, ConfigError> {
        self.utc_offset.as_deref().map(parse_utc_offset).transpose()
    }

    /// Zone for local calendar boundaries: `time_zone` when set, else the
    /// fixed `utc_offset`, else the host's zone.
    pub fn time_zone(&self) -> Result<TimeZone, ConfigError> {
        if let Some(name) = self.time_zone.as_deref() {
            return TimeZone::get(name.trim()).map_err(|source| ConfigError::TimeZone {
                name: name.to_string(),
                source,
            });
        }
        match (self.local_offset()?, self.utc_offset.as_deref()) {
            (Some(offset), Some(raw)) => Offset::from_seconds(offset.whole_seconds())
                .map(TimeZone::fixed)
                .map_err(|_| ConfigError::Offset(raw.to_string())),
            _ => Ok(TimeZone::system()),
        }
    }
}

fn parse_utc_offset(raw: &str) -> Result<UtcOffset, ConfigError> {
    let format = time::macros::format_description!("[offset_hour sign:mandatory]:[offset_minute]");
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return Ok(UtcOffset::UTC);
    }
    UtcOffset::parse(trimmed, &format).map_err(|_| ConfigError::Offset(raw.to_string()))
}
