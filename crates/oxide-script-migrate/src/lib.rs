//! Versioned SQL script migrations for Rust.
//!
//! `oxide-script-migrate` applies and rolls back an ordered folder of
//! hand-written change scripts and records which ones have run in a tracking
//! table inside the target database:
//! - Scripts are applied strictly in sequence order, and rolled back in
//!   reverse
//! - Re-running with nothing pending is a no-op
//! - A failing batch stops at the failing script; everything before it stays
//!   recorded
//! - Backends are pluggable through the [`Entity`](entity::Entity) trait
//!
//! # Architecture
//!
//! - **Entity** - The backend contract: tracking table and script execution
//! - **Catalog** - Discovers and orders the scripts of a migration folder
//! - **Engine** - The up/down/status state machine over one session
//! - **Config** - Connection settings and a shared, lock-guarded store
//! - **Bootstrap** - Opens a session, creating the database if it is missing
//!
//! # Migration folder
//!
//! ```text
//! migrations/
//!   001_users_up.sql
//!   001_users_down.sql
//!   002_posts_up.sql
//!   002_posts_down.sql
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_script_migrate::prelude::*;
//!
//! let config = BackendConfig::new("app.db").migration_folder("migrations");
//! let mut info = bootstrap::connect::<SqliteEntity>(&config).await?;
//!
//! info.up_all().await?;
//! assert_eq!(info.status().await?.as_deref(), Some("002_posts"));
//!
//! info.down(1).await?;
//! assert_eq!(info.status().await?.as_deref(), Some("001_users"));
//! info.close().await;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Apply pending migrations
//! oxide-script-migrate --config env.json up
//!
//! # Roll back the last migration
//! oxide-script-migrate --config env.json down --count 1
//!
//! # Show migration status
//! oxide-script-migrate --config env.json status
//! ```

pub mod backend;
pub mod bootstrap;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod entity;
pub mod error;
pub mod fixture;

/// Prelude for convenient imports.
pub mod prelude {
    #[cfg(feature = "mysql")]
    pub use crate::backend::MySqlEntity;
    pub use crate::backend::{MemoryEntity, SqliteEntity};
    pub use crate::bootstrap;
    pub use crate::catalog::{Catalog, MigrationFile, SequenceKey};
    pub use crate::config::{BackendConfig, ConfigStore};
    pub use crate::engine::{Info, SessionState, Steps};
    pub use crate::entity::{Connect, Entity, MigrationRecord, TrackingTable};
    pub use crate::error::{Direction, MigrateError, Result};
}
