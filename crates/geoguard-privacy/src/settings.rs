//! Privacy settings
//!
//! | Setting          | Default | Scope               |
//! | privacyEnabled   | true    | Global, per-site    |
//! | privacyLevel     | 5       | Global, per-site    |
//! | saveHistory      | true    | Global              |
//! | protectSensitive | true    | Global              |
//!
//! A `PrivacySettings` value is immutable once built. Changes produce a new
//! value with a bumped `version`, which is persisted and then swapped in.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use geoguard_relay::SiteSetting;
use geoguard_storage::Database;

use crate::error::PrivacyError;
use crate::Result;

/// Settings store keys.
pub mod keys {
    pub const PRIVACY_ENABLED: &str = "privacyEnabled";
    pub const PRIVACY_LEVEL: &str = "privacyLevel";
    pub const SAVE_HISTORY: &str = "saveHistory";
    pub const PROTECT_SENSITIVE: &str = "protectSensitive";
    pub const SITE_SETTINGS: &str = "siteSettings";
    pub const SETTINGS_VERSION: &str = "settingsVersion";
}

/// Obfuscation strength, 1 (least) to 10 (most).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivacyLevel(u8);

impl PrivacyLevel {
    pub const MIN: PrivacyLevel = PrivacyLevel(1);
    pub const MAX: PrivacyLevel = PrivacyLevel(10);
    pub const DEFAULT: PrivacyLevel = PrivacyLevel(geoguard_relay::DEFAULT_PRIVACY_LEVEL);
    /// Minimum level returned for sensitive locations.
    pub const SENSITIVE_FLOOR: PrivacyLevel = PrivacyLevel(8);

    pub fn new(level: i64) -> Result<Self> {
        if (i64::from(Self::MIN.0)..=i64::from(Self::MAX.0)).contains(&level) {
            Ok(PrivacyLevel(level as u8))
        } else {
            Err(PrivacyError::InvalidLevel(level))
        }
    }

    pub fn clamped(level: i64) -> Self {
        PrivacyLevel(level.clamp(i64::from(Self::MIN.0), i64::from(Self::MAX.0)) as u8)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn escalate_for_sensitive(self) -> Self {
        self.max(Self::SENSITIVE_FLOOR)
    }
}

impl Default for PrivacyLevel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl std::fmt::Display for PrivacyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveSettings {
    pub enabled: bool,
    pub privacy_level: PrivacyLevel,
    /// Whether a site entry overrode the global defaults.
    pub site_specific: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivacySettings {
    pub version: u64,
    pub enabled: bool,
    pub privacy_level: PrivacyLevel,
    pub save_history: bool,
    pub protect_sensitive: bool,
    pub site_settings: HashMap<String, SiteSetting>,
}

impl PrivacySettings {
    /// Resolve the settings that apply to `origin`.
    pub fn effective_for(&self, origin: &str) -> EffectiveSettings {
        if !origin.is_empty() {
            if let Some(site) = self.site_settings.get(&origin.to_lowercase()) {
                return EffectiveSettings {
                    enabled: site.enabled,
                    privacy_level: PrivacyLevel::clamped(site.privacy_level as i64),
                    site_specific: true,
                };
            }
        }

        EffectiveSettings {
            enabled: self.enabled,
            privacy_level: self.privacy_level,
            site_specific: false,
        }
    }

    /// Copy with `f` applied and the version bumped.
    pub fn updated<F>(&self, f: F) -> Result<PrivacySettings>
    where
        F: FnOnce(&mut PrivacySettings) -> Result<()>,
    {
        let mut next = self.clone();
        f(&mut next)?;
        next.version = self.version + 1;
        Ok(next)
    }

    pub fn set_site_settings(&mut self, sites: HashMap<String, SiteSetting>) -> Result<()> {
        for site in sites.values() {
            PrivacyLevel::new(site.privacy_level as i64)?;
        }

        self.site_settings = sites
            .into_iter()
            .map(|(domain, site)| (domain.to_lowercase(), site))
            .collect();
        Ok(())
    }

    /// Load from the settings store. Missing or unreadable keys take defaults.
    pub fn load(db: &Database) -> Result<Self> {
        let defaults = Self::default();

        let privacy_level = match db.get_setting(keys::PRIVACY_LEVEL)? {
            Some(raw) => parse_level(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "Unreadable privacy level, using default");
                defaults.privacy_level
            }),
            None => defaults.privacy_level,
        };

        Ok(Self {
            version: read_or(db, keys::SETTINGS_VERSION, defaults.version)?,
            enabled: read_or(db, keys::PRIVACY_ENABLED, defaults.enabled)?,
            privacy_level,
            save_history: read_or(db, keys::SAVE_HISTORY, defaults.save_history)?,
            protect_sensitive: read_or(db, keys::PROTECT_SENSITIVE, defaults.protect_sensitive)?,
            site_settings: read_or(db, keys::SITE_SETTINGS, defaults.site_settings)?,
        })
    }

    /// Persist every key in one transaction.
    pub fn save(&self, db: &Database) -> Result<()> {
        db.set_json_many(&[
            (keys::PRIVACY_ENABLED, serde_json::json!(self.enabled)),
            (keys::PRIVACY_LEVEL, serde_json::json!(self.privacy_level.get())),
            (keys::SAVE_HISTORY, serde_json::json!(self.save_history)),
            (keys::PROTECT_SENSITIVE, serde_json::json!(self.protect_sensitive)),
            (keys::SITE_SETTINGS, serde_json::json!(self.site_settings)),
            (keys::SETTINGS_VERSION, serde_json::json!(self.version)),
        ])?;
        Ok(())
    }
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            version: 0,
            enabled: true,
            privacy_level: PrivacyLevel::DEFAULT,
            save_history: true,
            protect_sensitive: true,
            site_settings: HashMap::new(),
        }
    }
}

fn read_or<T: serde::de::DeserializeOwned>(db: &Database, key: &str, default: T) -> Result<T> {
    match db.get_json(key) {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Ok(default),
        Err(geoguard_storage::StorageError::Json { key, source }) => {
            tracing::warn!(key = %key, error = %source, "Unreadable setting, using default");
            Ok(default)
        }
        Err(e) => Err(e.into()),
    }
}

// Settings UIs store the slider value either as a number or as its string form.
fn parse_level(raw: &str) -> Option<PrivacyLevel> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let level = match value {
        serde_json::Value::Number(n) => n.as_i64()?,
        serde_json::Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    Some(PrivacyLevel::clamped(level))
}
