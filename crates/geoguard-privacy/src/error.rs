//! Privacy error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrivacyError {
    #[error("Protection service returned status {0}")]
    ServiceStatus(u16),

    #[error("Protection service unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid service endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid privacy level: {0} (expected 1-10)")]
    InvalidLevel(i64),

    #[error("Storage error: {0}")]
    Storage(#[from] geoguard_storage::StorageError),
}
