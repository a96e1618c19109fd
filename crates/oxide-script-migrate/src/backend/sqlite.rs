//! SQLite backend.
//!
//! The database name is a file path (or `:memory:`). "Creating the database"
//! creates the file; without a selected database the connection is an
//! in-memory scratch database.

use std::io::ErrorKind;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::entity::{Connect, Entity, MigrationRecord, TrackingTable, next_sequence};
use crate::error::{MigrateError, Result};

const MEMORY: &str = ":memory:";

/// Migration backend for SQLite.
#[derive(Debug, Clone)]
pub struct SqliteEntity {
    pool: SqlitePool,
    table: TrackingTable,
}

impl SqliteEntity {
    /// Wraps an existing pool, tracking migrations in the default table.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            table: TrackingTable::default(),
        }
    }

    /// Uses `table` as the tracking table.
    #[must_use]
    pub fn with_table(mut self, table: TrackingTable) -> Self {
        self.table = table;
        self
    }

    /// Returns the connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn options(config: &BackendConfig) -> Result<SqliteConnectOptions> {
        let mut options = if config.database == MEMORY {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(&config.database)
                .create_if_missing(false)
        };

        for (key, value) in &config.parameters {
            options = match key.as_str() {
                "foreign_keys" => options.foreign_keys(is_truthy(value)),
                "busy_timeout" => match value.parse::<u64>() {
                    Ok(secs) => options.busy_timeout(Duration::from_secs(secs)),
                    Err(_) => {
                        warn!(key = %key, value = %value, "Ignoring invalid SQLite parameter");
                        options
                    }
                },
                _ => {
                    warn!(key = %key, "Ignoring unknown SQLite parameter");
                    options
                }
            };
        }
        Ok(options)
    }

    async fn open(options: SqliteConnectOptions) -> Result<SqlitePool> {
        // One connection for the session's lifetime; an in-memory database
        // would vanish with a recycled connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(pool)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "on" | "true" | "yes"
    )
}

fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.naive_utc())
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S"))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    Ok(parsed)
}

fn to_record((id, name, created_at): (i64, String, String)) -> Result<MigrationRecord> {
    let id = u32::try_from(id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    Ok(MigrationRecord {
        id,
        name,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait]
impl Entity for SqliteEntity {
    fn extension(&self) -> &'static str {
        ".sql"
    }

    fn update_config(config: &mut BackendConfig) {
        config
            .parameters
            .entry("foreign_keys".to_string())
            .or_insert_with(|| "ON".to_string());
    }

    async fn table_exist(&self) -> Result<bool> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(self.table.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0 > 0)
    }

    async fn create_table(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name VARCHAR(191) NOT NULL UNIQUE,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
)",
            self.table
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn latest(&self) -> Result<Option<MigrationRecord>> {
        let sql = format!(
            "SELECT id, name, CAST(created_at AS TEXT) FROM {} ORDER BY id DESC LIMIT 1",
            self.table
        );
        let row: Option<(i64, String, String)> =
            sqlx::query_as(&sql).fetch_optional(&self.pool).await?;
        row.map(to_record).transpose()
    }

    async fn records(&self) -> Result<Vec<MigrationRecord>> {
        let sql = format!(
            "SELECT id, name, CAST(created_at AS TEXT) FROM {} ORDER BY id",
            self.table
        );
        let rows: Vec<(i64, String, String)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(to_record).collect()
    }

    async fn migrate(&self, script: &str) -> Result<()> {
        debug!(sql = %script, "Executing SQL");
        sqlx::raw_sql(script).execute(&self.pool).await?;
        Ok(())
    }

    async fn record_up(&self, name: &str) -> Result<()> {
        let sql = format!("INSERT INTO {} (name) VALUES (?)", self.table);
        sqlx::query(&sql).bind(name).execute(&self.pool).await?;
        Ok(())
    }

    async fn record_down(&self, name: &str) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE name = ?", self.table);
        let result = sqlx::query(&sql).bind(name).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(MigrateError::NotRecorded(name.to_string()));
        }

        // sqlite_sequence holds the last id handed out, one below the next.
        let latest = self.latest().await?.map(|record| record.id);
        let seq = next_sequence(latest) - 1;
        sqlx::query("UPDATE sqlite_sequence SET seq = ? WHERE name = ?")
            .bind(i64::from(seq))
            .bind(self.table.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Connect for SqliteEntity {
    async fn connect(config: &BackendConfig, select_database: bool) -> Result<Self> {
        let table = TrackingTable::new(&config.table)?;
        let options = if select_database {
            Self::options(config)?
        } else {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        };
        Ok(Self::new(Self::open(options).await?).with_table(table))
    }

    async fn create_database(&self, config: &BackendConfig) -> Result<()> {
        if config.database == MEMORY {
            return Ok(());
        }
        let options = SqliteConnectOptions::new()
            .filename(&config.database)
            .create_if_missing(true);
        Self::open(options).await?.close().await;
        Ok(())
    }

    async fn drop_database(&self, config: &BackendConfig) -> Result<()> {
        if config.database == MEMORY {
            return Ok(());
        }
        tokio::fs::remove_file(&config.database).await?;
        for suffix in ["-wal", "-shm"] {
            // Journal side files only exist while the database is in WAL mode.
            match tokio::fs::remove_file(format!("{}{suffix}", config.database)).await {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
