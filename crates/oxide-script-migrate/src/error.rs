//! Error types for the migration engine.

use std::fmt;
use std::path::PathBuf;

/// Direction a migration step runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Applies the change script.
    Up,
    /// Reverts the change script.
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => f.write_str("up"),
            Self::Down => f.write_str("down"),
        }
    }
}

/// Errors that can occur during migration operations.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Error reported by the database driver, passed through unmodified.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A migration step failed; earlier steps of the batch stay recorded.
    #[error("Migration '{name}' failed while running {direction}: {source}")]
    Step {
        /// Display name of the failing migration.
        name: String,
        /// Direction of the failing step.
        direction: Direction,
        /// Underlying error from the script or the tracking table.
        #[source]
        source: Box<MigrateError>,
    },

    /// The create-database-and-reconnect cycle failed.
    #[error("Bootstrap failed while trying to {step}: {source}")]
    Bootstrap {
        /// Which bootstrap step failed.
        step: &'static str,
        /// Underlying error.
        #[source]
        source: Box<MigrateError>,
    },

    /// The tracking table references a migration missing from the folder.
    #[error("Tracking table references '{0}' which is not in the migration folder")]
    UnknownMigration(String),

    /// Tracking records are not applied in catalog order.
    #[error("Tracking table records '{name}' where '{expected}' was expected")]
    OutOfOrder {
        /// Name found in the tracking table.
        name: String,
        /// Name the catalog places at that position.
        expected: String,
    },

    /// Two files share a sequence key, so ordering is ambiguous.
    #[error("Ambiguous ordering: '{first}' and '{second}' share sequence key '{key}'")]
    DuplicateSequenceKey {
        /// The shared key.
        key: String,
        /// First file claiming the key.
        first: PathBuf,
        /// Second file claiming the key.
        second: PathBuf,
    },

    /// A down script exists without its up script.
    #[error("Down script without a matching up script: {0}")]
    OrphanDownScript(PathBuf),

    /// Rollback needs a down script that does not exist.
    #[error("Migration '{0}' has no down script")]
    MissingDownScript(String),

    /// A file with the backend extension does not follow the naming scheme.
    #[error("Invalid migration file name '{path}': {message}")]
    InvalidFileName {
        /// Path to the migration file.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// A table or database name rejected by the identifier allow-list.
    #[error("Invalid identifier: '{0}'")]
    InvalidIdentifier(String),

    /// Rollback asked to remove a record the tracking table does not hold.
    #[error("Migration '{0}' is not recorded as applied")]
    NotRecorded(String),

    /// No migrations directory found.
    #[error("Migrations directory not found: {0}")]
    MigrationsDirNotFound(PathBuf),

    /// IO error (reading migration files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// Configuration document lacks a required section or value.
    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    /// Failure injected by the in-memory backend.
    #[error("Injected failure: {0}")]
    Injected(String),
}

impl MigrateError {
    /// Wraps `self` with the migration name and direction it happened in.
    #[must_use]
    pub fn at_step(self, name: impl Into<String>, direction: Direction) -> Self {
        Self::Step {
            name: name.into(),
            direction,
            source: Box::new(self),
        }
    }

    /// Wraps `self` as a failed bootstrap step.
    #[must_use]
    pub fn during_bootstrap(self, step: &'static str) -> Self {
        Self::Bootstrap {
            step,
            source: Box::new(self),
        }
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
