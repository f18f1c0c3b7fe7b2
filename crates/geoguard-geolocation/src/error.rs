//! Geolocation error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric codes match the host API's error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionErrorCode {
    PermissionDenied = 1,
    PositionUnavailable = 2,
    Timeout = 3,
}

impl PositionErrorCode {
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl std::fmt::Display for PositionErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PositionErrorCode::PermissionDenied => "PERMISSION_DENIED",
            PositionErrorCode::PositionUnavailable => "POSITION_UNAVAILABLE",
            PositionErrorCode::Timeout => "TIMEOUT",
        };
        f.write_str(name)
    }
}

/// Error reported by the native geolocation source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct PositionError {
    pub code: PositionErrorCode,
    pub message: String,
}

impl PositionError {
    pub fn new(code: PositionErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(PositionErrorCode::PermissionDenied, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(PositionErrorCode::PositionUnavailable, message)
    }
}
