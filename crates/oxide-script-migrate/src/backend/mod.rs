//! Backend implementations.
//!
//! Each backend implements [`Entity`](crate::entity::Entity) for one storage
//! engine; the ones that can be opened from a [`BackendConfig`](crate::config::BackendConfig)
//! also implement [`Connect`](crate::entity::Connect).

mod memory;
#[cfg(feature = "mysql")]
mod mysql;
mod sqlite;

pub use memory::MemoryEntity;
#[cfg(feature = "mysql")]
pub use mysql::{DEFAULT_CHARSET, DEFAULT_COLLATION, MySqlEntity};
pub use sqlite::SqliteEntity;
