//! The backend contract.
//!
//! Every storage engine the migration engine can target implements
//! [`Entity`]. The contract is deliberately narrow: backends only store
//! tracking records and run scripts, while ordering and consistency decisions
//! live in [`crate::engine`].

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::config::BackendConfig;
use crate::error::{MigrateError, Result};

/// Default name of the tracking table.
pub const DEFAULT_TABLE: &str = "migration";

/// Maximum length of a migration name in the tracking table.
pub const MAX_NAME_LEN: usize = 191;

const MAX_IDENTIFIER_LEN: usize = 64;

/// Checks `name` against the identifier allow-list before it is placed into
/// SQL text.
///
/// # Errors
///
/// Returns [`MigrateError::InvalidIdentifier`] if `name` is empty, too long,
/// or contains anything outside `[A-Za-z_][A-Za-z0-9_]*`.
pub fn identifier(name: &str) -> Result<&str> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_head && valid_tail && name.len() <= MAX_IDENTIFIER_LEN {
        Ok(name)
    } else {
        Err(MigrateError::InvalidIdentifier(name.to_string()))
    }
}

/// One row of the tracking table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    /// Backend-assigned, auto-incrementing identifier.
    pub id: u32,
    /// Display name of the applied migration.
    pub name: String,
    /// When the migration was recorded.
    pub created_at: NaiveDateTime,
}

/// A validated tracking table name.
///
/// Identifiers cannot be bound as query parameters, so they are restricted to
/// `[A-Za-z_][A-Za-z0-9_]*` before being placed into SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingTable(String);

impl TrackingTable {
    /// Validates `name` as a tracking table identifier.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::InvalidIdentifier`] if `name` contains anything
    /// outside the allowed characters or is too long.
    pub fn new(name: &str) -> Result<Self> {
        identifier(name).map(|name| Self(name.to_string()))
    }

    /// Returns the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TrackingTable {
    fn default() -> Self {
        Self(DEFAULT_TABLE.to_string())
    }
}

impl std::fmt::Display for TrackingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier the next inserted record receives after a rollback.
///
/// `latest` is the highest id still present in the tracking table. Ids never
/// skip ahead after a rollback: the next record continues from the latest one,
/// and an empty table starts again at 1.
#[must_use]
pub fn next_sequence(latest: Option<u32>) -> u32 {
    latest.map_or(1, |id| id.saturating_add(1))
}

/// Operations every migration backend implements.
#[async_trait]
pub trait Entity: Send + Sync {
    /// File suffix of this backend's scripts, including the period.
    fn extension(&self) -> &'static str;

    /// Injects backend-mandatory connection parameters before connecting.
    fn update_config(config: &mut BackendConfig)
    where
        Self: Sized;

    /// Returns whether the tracking table exists.
    ///
    /// `Ok(false)` is the normal state of a fresh database; only real failures
    /// are reported as errors.
    async fn table_exist(&self) -> Result<bool>;

    /// Creates the tracking table if it does not exist.
    async fn create_table(&self) -> Result<()>;

    /// Returns the most recently applied record, if any.
    async fn latest(&self) -> Result<Option<MigrationRecord>>;

    /// Returns the name of the most recently applied migration, if any.
    async fn status(&self) -> Result<Option<String>> {
        Ok(self.latest().await?.map(|record| record.name))
    }

    /// Returns every record in id order.
    async fn records(&self) -> Result<Vec<MigrationRecord>>;

    /// Runs one raw change script verbatim.
    async fn migrate(&self, script: &str) -> Result<()>;

    /// Records `name` as applied.
    async fn record_up(&self, name: &str) -> Result<()>;

    /// Removes the record for `name` and renumbers the id counter so the next
    /// record receives [`next_sequence`] of the latest remaining id.
    async fn record_down(&self, name: &str) -> Result<()>;
}

/// Backends that can be opened by the bootstrap flow.
#[async_trait]
pub trait Connect: Entity + Sized {
    /// Opens a connection; without `select_database` the connection targets
    /// the server only, so the database can be created.
    async fn connect(config: &BackendConfig, select_database: bool) -> Result<Self>;

    /// Creates the configured database.
    async fn create_database(&self, config: &BackendConfig) -> Result<()>;

    /// Drops the configured database.
    async fn drop_database(&self, config: &BackendConfig) -> Result<()>;

    /// Closes the connection.
    async fn close(&self);
}
