//! Database connection and settings operations

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;

use crate::error::StorageError;
use crate::migrations::run_migrations;
use crate::Result;

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode so a reload never blocks on a concurrent settings write
        let _: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

        run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.with_connection(|conn| {
            let value = conn
                .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(value)
        })
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let updated_at = Utc::now().to_rfc3339();
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![key, value, updated_at],
            )?;
            Ok(())
        })?;

        Ok(())
    }

    /// Read a JSON-encoded setting.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_setting(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StorageError::Json {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Write several JSON-encoded settings in one transaction.
    pub fn set_json_many(&self, entries: &[(&str, serde_json::Value)]) -> Result<()> {
        let updated_at = Utc::now().to_rfc3339();
        self.transaction(|conn| {
            for (key, value) in entries {
                let raw = serde_json::to_string(value).map_err(|source| StorageError::Json {
                    key: key.to_string(),
                    source,
                })?;
                conn.execute(
                    "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![key, raw, updated_at],
                )?;
            }
            Ok(())
        })
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        db.with_connection(|conn| {
            let count: i32 =
                conn.query_row("SELECT COUNT(*) FROM settings", [], |row| row.get(0))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_setting_overwrite() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_setting("privacyLevel").unwrap(), None);

        db.set_setting("privacyLevel", "5").unwrap();
        db.set_setting("privacyLevel", "7").unwrap();
        assert_eq!(db.get_setting("privacyLevel").unwrap().as_deref(), Some("7"));
    }

    #[test]
    fn test_json_settings() {
        let db = Database::open_in_memory().unwrap();
        db.set_json_many(&[
            ("privacyEnabled", json!(false)),
            ("siteSettings", json!({"example.com": {"enabled": true, "privacyLevel": 3}})),
        ])
        .unwrap();

        let enabled: Option<bool> = db.get_json("privacyEnabled").unwrap();
        assert_eq!(enabled, Some(false));

        let sites: Option<serde_json::Value> = db.get_json("siteSettings").unwrap();
        assert_eq!(sites.unwrap()["example.com"]["privacyLevel"], 3);
    }

    #[test]
    fn test_corrupt_json_is_reported() {
        let db = Database::open_in_memory().unwrap();
        db.set_setting("privacyEnabled", "not-json").unwrap();

        let result: Result<Option<bool>> = db.get_json("privacyEnabled");
        assert!(matches!(result, Err(StorageError::Json { ref key, .. }) if key == "privacyEnabled"));
    }
}
