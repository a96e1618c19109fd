//! Helpers for test suites that run against a scratch database.

use tracing::info;

use crate::bootstrap;
use crate::config::{self, BackendConfig};
use crate::engine::Info;
use crate::entity::Connect;
use crate::error::Result;

/// Opens a session on `database` and refreshes its schema by rolling
/// everything back and applying everything again.
///
/// Returns the session and the configuration it was opened with.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or any migration fails.
pub async fn set_up<E: Connect>(
    config: &BackendConfig,
    database: &str,
) -> Result<(Info<E>, BackendConfig)> {
    let mut config = config.clone();
    config.database = database.to_string();

    let mut info = bootstrap::connect::<E>(&config).await?;
    let applied = info.reset().await?;
    info!(database, count = applied.len(), "Test database ready");
    Ok((info, config))
}

/// Like [`set_up`], using the process-wide configuration store.
///
/// # Errors
///
/// See [`set_up`].
pub async fn set_up_shared<E: Connect>(database: &str) -> Result<(Info<E>, BackendConfig)> {
    set_up(&config::shared().config(), database).await
}

/// Drops the scratch database and closes the session.
///
/// # Errors
///
/// Returns an error if the database cannot be dropped; the session is closed
/// either way.
pub async fn tear_down<E: Connect>(info: Info<E>, config: &BackendConfig) -> Result<()> {
    let dropped = info.entity().drop_database(config).await;
    info.close().await;
    dropped
}
