//! Configuration management for nestwatch.
//!
//! Configuration is loaded with figment from a TOML file and environment
//! variables layered over built-in defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geometry::Zone;
use crate::scheduler::{max_ttl, MAX_DELAY};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "nestwatch";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "violations.db";

/// Prefix of environment variable overrides.
const ENV_PREFIX: &str = "NESTWATCH_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables, e.g. `NESTWATCH_ZONE__RADIUS=50`
/// 2. TOML config file at `~/.config/nestwatch/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The watched zone.
    pub zone: ZoneConfig,
    /// Polling configuration.
    pub monitor: MonitorConfig,
    /// How long violations are kept.
    pub retention: RetentionConfig,
    /// Upstream data sources.
    pub sources: SourcesConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
}

/// The no-drone zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    /// X coordinate of the zone origin, in meters.
    pub origin_x: f64,
    /// Y coordinate of the zone origin, in meters.
    pub origin_y: f64,
    /// Zone radius, in the same units as computed distances.
    pub radius: f64,
}

/// Polling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Interval between telemetry polls in milliseconds.
    pub poll_interval_ms: u64,
}

/// Retention configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Seconds a violation stays active after its last detection.
    /// Set to 0 to keep violations until explicitly cleared.
    pub ttl_secs: u64,
}

/// Upstream source configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// URL of the drone telemetry report.
    pub drones_url: String,
    /// Base URL of the pilot identity source; the serial number is appended.
    pub pilots_url: String,
    /// Timeout for every outbound request in milliseconds.
    pub request_timeout_ms: u64,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/nestwatch/violations.db`
    pub database_path: Option<PathBuf>,
    /// Keep violations in memory only.
    pub in_memory: bool,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        let zone = Zone::default();
        Self {
            origin_x: zone.origin_x,
            origin_y: zone.origin_y,
            radius: zone.radius,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { ttl_secs: 600 }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            drones_url: "https://assignments.reaktor.com/birdnest/drones".to_string(),
            pilots_url: "https://assignments.reaktor.com/birdnest/pilots".to_string(),
            request_timeout_ms: 5_000,
        }
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}

/// The longest retention window the expiry timers support.
pub const MAX_TTL_SECS: u64 = MAX_DELAY.as_secs();

fn ttl_from_secs(secs: u64) -> Option<chrono::Duration> {
    if secs > MAX_TTL_SECS {
        return None;
    }
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
}

fn validate_url(name: &str, value: &str) -> Result<()> {
    let url = reqwest::Url::parse(value).map_err(|e| invalid(format!("{name} '{value}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!(
            "{name} must be an http or https URL, got '{value}'"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// A missing file is not an error; defaults and environment apply.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);
        let config = Self::figment(Toml::file(&config_file)).extract::<Self>()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string, with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    pub fn from_toml(toml: &str) -> Result<Self> {
        let config = Self::figment(Toml::string(toml)).extract::<Self>()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(file: figment::providers::Data<Toml>) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let zone = &self.zone;
        if !zone.origin_x.is_finite() || !zone.origin_y.is_finite() {
            return Err(invalid(format!(
                "zone origin must be finite, got ({}, {})",
                zone.origin_x, zone.origin_y
            )));
        }
        if !zone.radius.is_finite() || zone.radius <= 0.0 {
            return Err(invalid(format!(
                "zone radius must be a positive number, got {}",
                zone.radius
            )));
        }

        if self.monitor.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms must be greater than 0"));
        }
        if self.sources.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms must be greater than 0"));
        }
        if ttl_from_secs(self.retention.ttl_secs).is_none() {
            return Err(invalid(format!(
                "ttl_secs must be at most {MAX_TTL_SECS}, got {}",
                self.retention.ttl_secs
            )));
        }

        validate_url("drones_url", &self.sources.drones_url)?;
        validate_url("pilots_url", &self.sources.pilots_url)?;

        Ok(())
    }

    /// The watched zone.
    #[must_use]
    pub fn zone(&self) -> Zone {
        Zone::new(self.zone.origin_x, self.zone.origin_y, self.zone.radius)
    }

    /// Get the poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.monitor.poll_interval_ms)
    }

    /// Get the request timeout as a Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.sources.request_timeout_ms)
    }

    /// Get the retention window. Zero disables eviction.
    #[must_use]
    pub fn ttl(&self) -> chrono::Duration {
        ttl_from_secs(self.retention.ttl_secs).unwrap_or_else(max_ttl)
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }
}
