//! GeoGuard configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use geoguard_geolocation::{InterceptorOptions, DEFAULT_WATCH_IN_FLIGHT_LIMIT};
use geoguard_privacy::HostOptions;

use crate::error::CoreError;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the settings database
    pub database_path: PathBuf,
    /// Base URL of the protection service
    pub service_endpoint: String,
    /// How long a caller waits for a protected position
    pub relay_timeout_ms: u64,
    /// Protection service request timeout
    pub service_timeout_ms: u64,
    pub keep_alive_interval_secs: u64,
    /// Unsettled readings per watch; 0 means unbounded
    pub watch_in_flight_limit: Option<usize>,
    pub update_channel_capacity: usize,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            database_path: data_dir.join("geoguard.db"),
            service_endpoint: "http://127.0.0.1:5000".to_string(),
            relay_timeout_ms: 3000,
            service_timeout_ms: 10_000,
            keep_alive_interval_secs: 60,
            watch_in_flight_limit: Some(DEFAULT_WATCH_IN_FLIGHT_LIMIT),
            update_channel_capacity: 64,
        }
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("GeoGuard"))
            .unwrap_or_else(|| PathBuf::from(".geoguard"))
    }

    /// Parse TOML. Missing keys keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.service_url()?;
        if self.relay_timeout_ms == 0 {
            return Err(CoreError::Config("relay_timeout_ms must be positive".to_string()));
        }
        if self.keep_alive_interval_secs == 0 {
            return Err(CoreError::Config(
                "keep_alive_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn service_url(&self) -> Result<Url> {
        Url::parse(&self.service_endpoint).map_err(|e| {
            CoreError::Config(format!("invalid service_endpoint {}: {}", self.service_endpoint, e))
        })
    }

    pub fn service_timeout(&self) -> Duration {
        Duration::from_millis(self.service_timeout_ms)
    }

    pub fn interceptor_options(&self) -> InterceptorOptions {
        InterceptorOptions {
            relay_timeout: Duration::from_millis(self.relay_timeout_ms),
            watch_in_flight_limit: self.watch_in_flight_limit.filter(|limit| *limit > 0),
        }
    }

    pub fn host_options(&self) -> HostOptions {
        HostOptions {
            keep_alive_interval: Duration::from_secs(self.keep_alive_interval_secs),
            update_capacity: self.update_channel_capacity,
            ..HostOptions::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}

// Simple dirs implementation for common directories
mod dirs {
    use std::path::PathBuf;

    pub fn data_local_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("LOCALAPPDATA").ok().map(PathBuf::from)
        }
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library/Application Support"))
        }
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_DATA_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".local/share"))
                })
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        {
            None
        }
    }
}
