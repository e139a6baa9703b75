use anyhow::{Context, Result, anyhow};
use chrono::FixedOffset;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

use crate::{
    error::ValidationError,
    location::{DEFAULT_LOCATION, validate_location},
    provider::cwa::{CWA_BASE_URL, DEFAULT_OBSERVATION_STATION, DEFAULT_TIMEOUT},
    sun::SunTable,
};

/// Taiwan standard time, the timezone of the bundled sunrise/sunset table.
const DEFAULT_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// authorization = "CWA-XXXXXXXX"
/// location = "高雄市"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// CWA open-data authorization token.
    pub authorization: Option<String>,

    /// Last location saved from the location form.
    pub location: Option<String>,

    /// Station queried for current conditions.
    pub observation_station: Option<String>,

    pub base_url: Option<String>,

    pub fetch_timeout_secs: Option<u64>,

    /// Offset used for "now" when deciding day or night.
    pub utc_offset_secs: Option<i32>,

    /// Optional replacement for the bundled sunrise/sunset table.
    pub sun_table: Option<PathBuf>,
}

impl Config {
    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref().filter(|s| !s.trim().is_empty())
    }

    pub fn set_authorization(&mut self, token: String) {
        self.authorization = Some(token.trim().to_string());
    }

    /// Saved location, falling back to the default when nothing valid is stored.
    pub fn location(&self) -> &str {
        match self.location.as_deref() {
            Some(name) if validate_location(name).is_ok() => name,
            Some(name) => {
                tracing::warn!(location = name, "ignoring unsupported saved location");
                DEFAULT_LOCATION
            }
            None => DEFAULT_LOCATION,
        }
    }

    /// Validate and store a new location. Invalid input leaves config untouched.
    pub fn set_location(&mut self, input: &str) -> Result<(), ValidationError> {
        let name = validate_location(input)?;
        self.location = Some(name);
        Ok(())
    }

    pub fn observation_station(&self) -> &str {
        self.observation_station
            .as_deref()
            .unwrap_or(DEFAULT_OBSERVATION_STATION)
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(CWA_BASE_URL)
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn utc_offset(&self) -> Result<FixedOffset> {
        let secs = self.utc_offset_secs.unwrap_or(DEFAULT_UTC_OFFSET_SECS);
        FixedOffset::east_opt(secs).ok_or_else(|| anyhow!("Invalid utc_offset_secs: {secs}"))
    }

    /// The configured sunrise/sunset table, or the bundled one.
    pub fn load_sun_table(&self) -> Result<SunTable> {
        match &self.sun_table {
            Some(path) => SunTable::from_path(path),
            None => SunTable::bundled(),
        }
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!(path = %path.display(), "saved config");
        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weather-card", "weather-card")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }
}
