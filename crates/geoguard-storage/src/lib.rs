//! GeoGuard Storage Layer
//!
//! SQLite-backed key/value store for persisted privacy settings.
//! Multi-key writes are transactional so a reload never observes a
//! half-written settings object.

mod database;
mod error;
mod migrations;

pub use database::Database;
pub use error::StorageError;

pub type Result<T> = std::result::Result<T, StorageError>;
