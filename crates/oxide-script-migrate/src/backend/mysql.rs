//! MySQL backend.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::entity::{Connect, Entity, MigrationRecord, TrackingTable, identifier, next_sequence};
use crate::error::{MigrateError, Result};

/// Character set enforced on every connection.
pub const DEFAULT_CHARSET: &str = "utf8mb4";

/// Collation enforced on every connection.
pub const DEFAULT_COLLATION: &str = "utf8mb4_unicode_ci";

/// Migration backend for MySQL.
#[derive(Debug, Clone)]
pub struct MySqlEntity {
    pool: MySqlPool,
    table: TrackingTable,
}

impl MySqlEntity {
    /// Wraps an existing pool, tracking migrations in the default table.
    pub fn new(pool: MySqlPool) -> Self {
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
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

/// Builds typed connect options; no connection string is ever assembled.
fn connect_options(config: &BackendConfig, select_database: bool) -> MySqlConnectOptions {
    let mut options = MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.username);

    if !config.password.is_empty() {
        options = options.password(&config.password);
    }
    if select_database {
        options = options.database(&config.database);
    }
    if !config.charset.is_empty() {
        options = options.charset(&config.charset);
    }
    if !config.collation.is_empty() {
        options = options.collation(&config.collation);
    }

    for (key, value) in &config.parameters {
        if key == "timezone" {
            options = options.timezone(Some(value.clone()));
        } else {
            warn!(key = %key, "Ignoring unknown MySQL parameter");
        }
    }
    options
}

/// `CREATE DATABASE` statement for `config`, with every identifier checked.
fn create_database_sql(config: &BackendConfig) -> Result<String> {
    let database = identifier(&config.database)?;
    let charset = identifier(if config.charset.is_empty() {
        DEFAULT_CHARSET
    } else {
        &config.charset
    })?;
    let collation = identifier(if config.collation.is_empty() {
        DEFAULT_COLLATION
    } else {
        &config.collation
    })?;
    Ok(format!(
        "CREATE DATABASE IF NOT EXISTS `{database}` DEFAULT CHARSET = {charset} COLLATE = {collation}"
    ))
}

#[async_trait]
impl Entity for MySqlEntity {
    fn extension(&self) -> &'static str {
        ".sql"
    }

    fn update_config(config: &mut BackendConfig) {
        if config.charset.is_empty() {
            config.charset = DEFAULT_CHARSET.to_string();
        }
        if config.collation.is_empty() {
            config.collation = DEFAULT_COLLATION.to_string();
        }
    }

    async fn table_exist(&self) -> Result<bool> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = DATABASE() AND table_name = ?",
        )
        .bind(self.table.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0 > 0)
    }

    async fn create_table(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS `{}` (
    id INT UNSIGNED NOT NULL AUTO_INCREMENT,
    name VARCHAR(191) NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE KEY (name),
    PRIMARY KEY (id)
)",
            self.table
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn latest(&self) -> Result<Option<MigrationRecord>> {
        let sql = format!(
            "SELECT id, name, created_at FROM `{}` ORDER BY id DESC LIMIT 1",
            self.table
        );
        let row: Option<(u32, String, NaiveDateTime)> =
            sqlx::query_as(&sql).fetch_optional(&self.pool).await?;
        Ok(row.map(|(id, name, created_at)| MigrationRecord {
            id,
            name,
            created_at,
        }))
    }

    async fn records(&self) -> Result<Vec<MigrationRecord>> {
        let sql = format!("SELECT id, name, created_at FROM `{}` ORDER BY id", self.table);
        let rows: Vec<(u32, String, NaiveDateTime)> =
            sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(id, name, created_at)| MigrationRecord {
                id,
                name,
                created_at,
            })
            .collect())
    }

    async fn migrate(&self, script: &str) -> Result<()> {
        debug!(sql = %script, "Executing SQL");
        sqlx::raw_sql(script).execute(&self.pool).await?;
        Ok(())
    }

    async fn record_up(&self, name: &str) -> Result<()> {
        let sql = format!("INSERT INTO `{}` (name) VALUES (?)", self.table);
        sqlx::query(&sql).bind(name).execute(&self.pool).await?;
        Ok(())
    }

    async fn record_down(&self, name: &str) -> Result<()> {
        let sql = format!("DELETE FROM `{}` WHERE name = ? LIMIT 1", self.table);
        let result = sqlx::query(&sql).bind(name).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(MigrateError::NotRecorded(name.to_string()));
        }

        let latest = self.latest().await?.map(|record| record.id);
        let sql = format!(
            "ALTER TABLE `{}` AUTO_INCREMENT = {}",
            self.table,
            next_sequence(latest)
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Connect for MySqlEntity {
    async fn connect(config: &BackendConfig, select_database: bool) -> Result<Self> {
        let table = TrackingTable::new(&config.table)?;
        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options(config, select_database))
            .await?;
        Ok(Self::new(pool).with_table(table))
    }

    async fn create_database(&self, config: &BackendConfig) -> Result<()> {
        let sql = create_database_sql(config)?;
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn drop_database(&self, config: &BackendConfig) -> Result<()> {
        let sql = format!(
            "DROP DATABASE IF EXISTS `{}`",
            identifier(&config.database)?
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
