//! Opening a migration session.
//!
//! The bootstrap flow heals a missing database: when the first connection
//! fails it connects to the server alone, creates the database and reconnects.
//! That cycle runs once; a second failure is returned to the caller.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::{self, BackendConfig};
use crate::engine::Info;
use crate::entity::{Connect, TrackingTable};
use crate::error::Result;

/// Environment variable holding the path of the project's configuration file.
///
/// Its parent directory is the project root that relative migration folders
/// are resolved against.
pub const CONFIG_ENV: &str = "OXIDE_CONFIG";

/// Resolves the migration folder against the project root, falling back to
/// the current directory when it does not exist there.
#[must_use]
pub fn resolve_folder(folder: &Path) -> PathBuf {
    let config_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    let cwd = std::env::current_dir().unwrap_or_default();
    resolve_folder_from(config_path.as_deref(), &cwd, folder)
}

fn resolve_folder_from(config_path: Option<&Path>, cwd: &Path, folder: &Path) -> PathBuf {
    let root = config_path
        .and_then(Path::parent)
        .unwrap_or_else(|| Path::new("."));
    let candidate = root.join(folder);
    if candidate.exists() {
        candidate
    } else {
        cwd.join(folder)
    }
}

/// Opens a session for `config`, creating the database if necessary.
///
/// # Errors
///
/// Returns [`MigrateError::InvalidIdentifier`](crate::error::MigrateError::InvalidIdentifier)
/// for a bad tracking table name, or
/// [`MigrateError::Bootstrap`](crate::error::MigrateError::Bootstrap) when
/// the create-and-reconnect cycle fails.
pub async fn connect<E: Connect>(config: &BackendConfig) -> Result<Info<E>> {
    TrackingTable::new(&config.table)?;
    let folder = resolve_folder(&config.migration_folder);
    debug!(folder = %folder.display(), "Resolved migration folder");

    let mut config = config.clone();
    E::update_config(&mut config);

    let entity = open::<E>(&config).await?;
    Ok(Info::new(entity, folder))
}

/// Opens a session from the process-wide configuration store.
///
/// # Errors
///
/// See [`connect`].
pub async fn connect_shared<E: Connect>() -> Result<Info<E>> {
    connect(&config::shared().config()).await
}

async fn open<E: Connect>(config: &BackendConfig) -> Result<E> {
    match E::connect(config, true).await {
        Ok(entity) => return Ok(entity),
        Err(e) => warn!(
            database = %config.database,
            error = %e,
            "Could not open database, creating it"
        ),
    }

    let server = E::connect(config, false)
        .await
        .map_err(|e| e.during_bootstrap("connect without a database"))?;
    let created = server.create_database(config).await;
    server.close().await;
    created.map_err(|e| e.during_bootstrap("create the database"))?;

    E::connect(config, true)
        .await
        .map_err(|e| e.during_bootstrap("reconnect"))
}
