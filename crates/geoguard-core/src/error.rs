//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] geoguard_storage::StorageError),

    #[error("Privacy error: {0}")]
    Privacy(#[from] geoguard_privacy::PrivacyError),

    #[error("Relay error: {0}")]
    Relay(#[from] geoguard_relay::RelayError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
