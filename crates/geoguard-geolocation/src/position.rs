//! Position data as delivered to callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Base of the synthetic accuracy scale, in meters.
pub const BASE_ACCURACY_METERS: f64 = 20.0;

/// Accuracy reported for a protected position. Higher levels report a
/// larger radius: level 1 is 30 m, level 10 is 120 m.
pub fn synthetic_accuracy(privacy_level: u8) -> f64 {
    BASE_ACCURACY_METERS * (1.0 + f64::from(privacy_level) / 2.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchId(pub u64);

impl std::fmt::Display for WatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    /// Meters
    pub accuracy: f64,
    pub altitude: Option<f64>,
    pub altitude_accuracy: Option<f64>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            altitude: None,
            altitude_accuracy: None,
            heading: None,
            speed: None,
        }
    }
}

/// How a delivered position relates to the real reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionInfo {
    /// The coordinates are the real reading.
    pub original: bool,
    /// Protection was attempted and failed.
    pub error: bool,
    pub privacy_level: Option<u8>,
    pub is_sensitive: bool,
}

impl ProtectionInfo {
    pub fn unprotected() -> Self {
        Self {
            original: true,
            error: false,
            privacy_level: None,
            is_sensitive: false,
        }
    }
}

impl Default for ProtectionInfo {
    fn default() -> Self {
        Self::unprotected()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub coords: Coordinates,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub protection: ProtectionInfo,
}

impl Position {
    /// A native reading taken now.
    pub fn new(coords: Coordinates) -> Self {
        Self::at(coords, Utc::now())
    }

    pub fn at(coords: Coordinates, timestamp: DateTime<Utc>) -> Self {
        Self {
            coords,
            timestamp,
            protection: ProtectionInfo::unprotected(),
        }
    }

    /// Copy of this reading moved to protected coordinates. Everything but
    /// latitude, longitude and accuracy is kept from the real reading.
    pub fn protected(
        &self,
        latitude: f64,
        longitude: f64,
        privacy_level: u8,
        is_sensitive: bool,
    ) -> Self {
        Self {
            coords: Coordinates {
                latitude,
                longitude,
                accuracy: synthetic_accuracy(privacy_level),
                ..self.coords
            },
            timestamp: self.timestamp,
            protection: ProtectionInfo {
                original: false,
                error: false,
                privacy_level: Some(privacy_level),
                is_sensitive,
            },
        }
    }

    /// The real reading, flagged with whether protection failed.
    pub fn original(&self, error: bool) -> Self {
        Self {
            protection: ProtectionInfo {
                error,
                ..ProtectionInfo::unprotected()
            },
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
    pub timeout: Option<Duration>,
    pub maximum_age: Option<Duration>,
}
