//! Backend connection settings and the shared configuration store.
//!
//! [`BackendConfig`] is a plain value: it is cloned into every bootstrap call
//! and carried by the session it produces. [`ConfigStore`] exists for callers
//! that must share one configuration without threading it through, such as
//! test fixtures running in parallel.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{OnceLock, RwLock};

use serde::Deserialize;

use crate::entity::DEFAULT_TABLE;
use crate::error::{MigrateError, Result};

/// Connection parameters for one backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Server host name.
    #[serde(alias = "Hostname")]
    pub host: String,
    /// Server port.
    #[serde(alias = "Port")]
    pub port: u16,
    /// User name.
    #[serde(alias = "Username")]
    pub username: String,
    /// Password.
    #[serde(alias = "Password")]
    pub password: String,
    /// Database name (a file path for SQLite).
    #[serde(alias = "Database")]
    pub database: String,
    /// Connection character set.
    #[serde(alias = "Charset")]
    pub charset: String,
    /// Connection collation.
    #[serde(alias = "Collation")]
    pub collation: String,
    /// Backend-specific dialect parameters.
    #[serde(alias = "Parameter")]
    pub parameters: BTreeMap<String, String>,
    /// Migration folder, relative to the project root.
    #[serde(alias = "MigrationFolder")]
    pub migration_folder: PathBuf,
    /// Name of the tracking table.
    #[serde(alias = "MigrationTable")]
    pub table: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            username: String::new(),
            password: String::new(),
            database: String::new(),
            charset: String::new(),
            collation: String::new(),
            parameters: BTreeMap::new(),
            migration_folder: PathBuf::from("migrations"),
            table: DEFAULT_TABLE.to_string(),
        }
    }
}

impl BackendConfig {
    /// Creates a configuration for the given database with default settings.
    #[must_use]
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    /// Sets the migration folder.
    #[must_use]
    pub fn migration_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.migration_folder = folder.into();
        self
    }

    /// Sets the tracking table name.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Adds a dialect parameter.
    #[must_use]
    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Parses the `section` entry (e.g. `"MySQL"`) of a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the section is missing.
    pub fn from_json_str(json: &str, section: &str) -> Result<Self> {
        let mut document: BTreeMap<String, serde_json::Value> = serde_json::from_str(json)?;
        let value = document
            .remove(section)
            .ok_or_else(|| MigrateError::MissingConfig(format!("section '{section}'")))?;
        Ok(serde_json::from_value(value)?)
    }

    /// Reads and parses the `section` entry of a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>, section: &str) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json, section)
    }
}

/// A reader/writer guarded holder of one [`BackendConfig`].
#[derive(Debug, Default)]
pub struct ConfigStore {
    inner: RwLock<BackendConfig>,
}

impl ConfigStore {
    /// Creates a store holding `config`.
    #[must_use]
    pub fn new(config: BackendConfig) -> Self {
        Self {
            inner: RwLock::new(config),
        }
    }

    /// Replaces the stored configuration.
    pub fn set_config(&self, config: BackendConfig) {
        // The guarded value is plain data, so a poisoned lock is still usable.
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = config;
    }

    /// Restores the default configuration.
    pub fn reset_config(&self) {
        self.set_config(BackendConfig::default());
    }

    /// Returns a copy of the stored configuration.
    #[must_use]
    pub fn config(&self) -> BackendConfig {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Returns the process-wide configuration store.
pub fn shared() -> &'static ConfigStore {
    static STORE: OnceLock<ConfigStore> = OnceLock::new();
    STORE.get_or_init(ConfigStore::default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_store_set_and_reset() {
        let store = ConfigStore::default();
        store.set_config(BackendConfig::new("app").table("schema_history"));

        let config = store.config();
        assert_eq!(config.database, "app");
        assert_eq!(config.table, "schema_history");

        store.reset_config();
        assert_eq!(store.config(), BackendConfig::default());
    }

    #[test]
    fn test_reads_are_copies() {
        let store = ConfigStore::new(BackendConfig::new("app"));
        let mut copy = store.config();
        copy.database = "other".to_string();
        assert_eq!(store.config().database, "app");
    }

    #[test]
    fn test_concurrent_readers_see_whole_values() {
        let store = Arc::new(ConfigStore::new(BackendConfig::new("a").table("a")));

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..200 {
                    let name = if i % 2 == 0 { "b" } else { "a" };
                    store.set_config(BackendConfig::new(name).table(name));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let config = store.config();
                        assert_eq!(config.database, config.table);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn test_from_json_section() {
        let json = r#"{
            "MySQL": {
                "Username": "root",
                "Password": "secret",
                "Database": "blog",
                "Hostname": "db.local",
                "Port": 3307,
                "MigrationFolder": "migration/mysql"
            }
        }"#;

        let config = BackendConfig::from_json_str(json, "MySQL").unwrap();
        assert_eq!(config.username, "root");
        assert_eq!(config.host, "db.local");
        assert_eq!(config.port, 3307);
        assert_eq!(config.migration_folder, PathBuf::from("migration/mysql"));
        assert_eq!(config.table, DEFAULT_TABLE);
    }

    #[test]
    fn test_from_json_missing_section() {
        let result = BackendConfig::from_json_str("{}", "SQLite");
        assert!(matches!(result, Err(MigrateError::MissingConfig(_))));
    }
}
