//! Migration engine.
//!
//! [`Info`] binds one open backend to one migration folder and runs the
//! up/down/status state machine over them. Every operation rescans the folder,
//! so the catalog always reflects what is on disk.
//!
//! Migrations are applied and rolled back strictly in sequence order. A batch
//! stops at the first failing step; steps completed before it stay recorded
//! and nothing is compensated automatically.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::catalog::{Catalog, MigrationFile};
use crate::entity::{Connect, Entity};
use crate::error::{Direction, MigrateError, Result};

/// How many migrations an operation may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Steps {
    /// Run everything that is pending (or applied, for rollback).
    All,
    /// Run at most this many.
    Count(usize),
}

impl Steps {
    fn limit(self, available: usize) -> usize {
        match self {
            Self::All => available,
            Self::Count(n) => n.min(available),
        }
    }
}

impl From<usize> for Steps {
    fn from(n: usize) -> Self {
        Self::Count(n)
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The tracking table has not been checked yet.
    Uninitialized,
    /// The tracking table is known to exist.
    TableChecked,
    /// Backend status has been reconciled with the catalog.
    Synced,
}

/// A migration session: one backend connection and one migration folder.
#[derive(Debug)]
pub struct Info<E: Entity> {
    entity: E,
    folder: PathBuf,
    state: SessionState,
}

impl<E: Entity> Info<E> {
    /// Creates a session over `entity` reading scripts from `folder`.
    pub fn new(entity: E, folder: impl Into<PathBuf>) -> Self {
        Self {
            entity,
            folder: folder.into(),
            state: SessionState::Uninitialized,
        }
    }

    /// Returns the backend.
    #[must_use]
    pub fn entity(&self) -> &E {
        &self.entity
    }

    /// Returns the migration folder.
    #[must_use]
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Returns the session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Scans the migration folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder cannot be read or its files are
    /// ambiguous; see [`Catalog::load`].
    pub fn catalog(&self) -> Result<Catalog> {
        Catalog::load(&self.folder, self.entity.extension())
    }

    /// Creates the tracking table on first use.
    async fn ensure_table(&mut self) -> Result<()> {
        if self.state != SessionState::Uninitialized {
            return Ok(());
        }
        if !self.entity.table_exist().await? {
            info!("Creating migration tracking table");
            self.entity.create_table().await?;
        }
        self.state = SessionState::TableChecked;
        Ok(())
    }

    /// Loads the catalog and checks the tracking records against it.
    ///
    /// Every record must name the catalog entry at its own position, so the
    /// applied set is always a prefix of the catalog. Returns the catalog and
    /// the position of the last applied migration.
    async fn sync(&mut self) -> Result<(Catalog, Option<usize>)> {
        self.ensure_table().await?;
        let catalog = self.catalog()?;
        let records = self.entity.records().await?;
        for (index, record) in records.iter().enumerate() {
            let position = catalog
                .position(&record.name)
                .ok_or_else(|| MigrateError::UnknownMigration(record.name.clone()))?;
            if position != index {
                return Err(MigrateError::OutOfOrder {
                    name: record.name.clone(),
                    expected: catalog.at(index).map(|f| f.name.clone()).unwrap_or_default(),
                });
            }
        }
        self.state = SessionState::Synced;
        Ok((catalog, records.len().checked_sub(1)))
    }

    /// Returns the name of the last applied migration.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::UnknownMigration`] if any recorded name is no
    /// longer in the folder, [`MigrateError::OutOfOrder`] if the records skip
    /// a migration, or any backend error.
    pub async fn status(&mut self) -> Result<Option<String>> {
        let (catalog, position) = self.sync().await?;
        Ok(position.and_then(|i| catalog.at(i)).map(|f| f.name.clone()))
    }

    /// Returns the names of applied migrations in sequence order.
    ///
    /// # Errors
    ///
    /// Same as [`Info::status`].
    pub async fn applied(&mut self) -> Result<Vec<String>> {
        let (catalog, position) = self.sync().await?;
        let end = position.map_or(0, |i| i + 1);
        Ok(names(catalog.slice(0..end).iter()))
    }

    /// Returns the names of pending migrations in sequence order.
    ///
    /// # Errors
    ///
    /// Same as [`Info::status`].
    pub async fn pending(&mut self) -> Result<Vec<String>> {
        let (catalog, position) = self.sync().await?;
        let start = position.map_or(0, |i| i + 1);
        Ok(names(catalog.slice(start..catalog.len()).iter()))
    }

    /// Checks the tracking table against the migration folder without running
    /// anything.
    ///
    /// # Errors
    ///
    /// Same as [`Info::status`].
    pub async fn verify(&mut self) -> Result<()> {
        self.sync().await.map(|_| ())
    }

    /// Applies up to `steps` pending migrations and returns their names.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::Step`] naming the first migration that failed;
    /// every migration before it remains applied.
    pub async fn up(&mut self, steps: impl Into<Steps>) -> Result<Vec<String>> {
        let (catalog, position) = self.sync().await?;
        let start = position.map_or(0, |i| i + 1);
        let end = start + steps.into().limit(catalog.len() - start);

        let mut applied = Vec::new();
        for file in catalog.slice(start..end) {
            self.run(file, Direction::Up).await?;
            info!(name = %file.name, "Migration applied");
            applied.push(file.name.clone());
        }

        if applied.is_empty() {
            debug!("No pending migrations");
        }
        Ok(applied)
    }

    /// Rolls back up to `steps` applied migrations, most recent first, and
    /// returns their names.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::Step`] naming the first migration that failed,
    /// wrapping [`MigrateError::MissingDownScript`] if it has no down half.
    pub async fn down(&mut self, steps: impl Into<Steps>) -> Result<Vec<String>> {
        let (catalog, position) = self.sync().await?;
        let Some(last) = position else {
            debug!("No applied migrations");
            return Ok(Vec::new());
        };
        let count = steps.into().limit(last + 1);

        let mut reverted = Vec::new();
        for file in catalog.slice(last + 1 - count..last + 1).iter().rev() {
            self.run(file, Direction::Down).await?;
            info!(name = %file.name, "Migration rolled back");
            reverted.push(file.name.clone());
        }
        Ok(reverted)
    }

    /// Applies every pending migration.
    ///
    /// # Errors
    ///
    /// See [`Info::up`].
    pub async fn up_all(&mut self) -> Result<Vec<String>> {
        self.up(Steps::All).await
    }

    /// Rolls back every applied migration.
    ///
    /// # Errors
    ///
    /// See [`Info::down`].
    pub async fn down_all(&mut self) -> Result<Vec<String>> {
        self.down(Steps::All).await
    }

    /// Rolls everything back, then applies everything again.
    ///
    /// # Errors
    ///
    /// Fails on the first step that fails in either direction.
    pub async fn reset(&mut self) -> Result<Vec<String>> {
        self.down_all().await?;
        self.up_all().await
    }

    /// Runs one script and updates the tracking table.
    async fn run(&self, file: &MigrationFile, direction: Direction) -> Result<()> {
        let result = async {
            let script = file.script(direction).await?;
            self.entity.migrate(&script).await?;
            match direction {
                Direction::Up => self.entity.record_up(&file.name).await,
                Direction::Down => self.entity.record_down(&file.name).await,
            }
        }
        .await;
        result.map_err(|e| e.at_step(&file.name, direction))
    }
}

impl<E: Connect> Info<E> {
    /// Releases the backend connection.
    pub async fn close(self) {
        self.entity.close().await;
    }
}

fn names<'a>(files: impl Iterator<Item = &'a MigrationFile>) -> Vec<String> {
    files.map(|f| f.name.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryEntity;
    use std::fs;
    use tempfile::TempDir;

    fn folder(migrations: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for name in migrations {
            fs::write(dir.path().join(format!("{name}_up.sql")), format!("UP {name}")).unwrap();
            fs::write(
                dir.path().join(format!("{name}_down.sql")),
                format!("DOWN {name}"),
            )
            .unwrap();
        }
        dir
    }

    fn session(dir: &TempDir, entity: MemoryEntity) -> Info<MemoryEntity> {
        Info::new(entity, dir.path())
    }

    #[tokio::test]
    async fn test_up_all_applies_in_order() {
        let dir = folder(&["002_posts", "001_users", "010_tags"]);
        let mut info = session(&dir, MemoryEntity::new());

        let applied = info.up_all().await.unwrap();
        assert_eq!(applied, ["001_users", "002_posts", "010_tags"]);
        assert_eq!(
            info.entity().executed(),
            ["UP 001_users", "UP 002_posts", "UP 010_tags"]
        );
        assert_eq!(info.status().await.unwrap().as_deref(), Some("010_tags"));
        assert_eq!(info.state(), SessionState::Synced);
    }

    #[tokio::test]
    async fn test_up_is_idempotent() {
        let dir = folder(&["001_users", "002_posts"]);
        let mut info = session(&dir, MemoryEntity::new());

        info.up_all().await.unwrap();
        let second = info.up_all().await.unwrap();
        assert!(second.is_empty());
        assert_eq!(info.entity().executed().len(), 2);
    }

    #[tokio::test]
    async fn test_down_with_nothing_applied_is_noop() {
        let dir = folder(&["001_users"]);
        let mut info = session(&dir, MemoryEntity::new());
        assert!(info.down_all().await.unwrap().is_empty());
        assert!(info.entity().executed().is_empty());
    }

    #[tokio::test]
    async fn test_steps_limit() {
        let dir = folder(&["001_a", "002_b", "003_c"]);
        let mut info = session(&dir, MemoryEntity::new());

        assert_eq!(info.up(2).await.unwrap(), ["001_a", "002_b"]);
        assert_eq!(info.pending().await.unwrap(), ["003_c"]);
        assert_eq!(info.up(5).await.unwrap(), ["003_c"]);
        assert_eq!(info.down(0).await.unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_users_posts_scenario() {
        let dir = folder(&["001_users", "002_posts"]);
        let mut info = session(&dir, MemoryEntity::new());

        info.up_all().await.unwrap();
        assert_eq!(info.status().await.unwrap().as_deref(), Some("002_posts"));

        assert_eq!(info.down(1).await.unwrap(), ["002_posts"]);
        assert_eq!(info.status().await.unwrap().as_deref(), Some("001_users"));
        assert_eq!(info.entity().executed().last().unwrap(), "DOWN 002_posts");
        assert_eq!(info.applied().await.unwrap(), ["001_users"]);
    }

    #[tokio::test]
    async fn test_down_all_reverses_order() {
        let dir = folder(&["001_a", "002_b", "003_c"]);
        let mut info = session(&dir, MemoryEntity::new());
        info.up_all().await.unwrap();

        assert_eq!(info.down_all().await.unwrap(), ["003_c", "002_b", "001_a"]);
        assert_eq!(info.status().await.unwrap(), None);
        assert!(info.entity().records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_prior_steps() {
        let dir = folder(&["001_users", "002_posts", "003_tags"]);
        let mut info = session(&dir, MemoryEntity::new().fail_script("UP 002_posts"));

        let err = info.up_all().await.unwrap_err();
        match err {
            MigrateError::Step {
                name, direction, ..
            } => {
                assert_eq!(name, "002_posts");
                assert_eq!(direction, Direction::Up);
            }
            other => panic!("Expected step error, got {other:?}"),
        }

        assert_eq!(info.status().await.unwrap().as_deref(), Some("001_users"));
        assert_eq!(info.pending().await.unwrap(), ["002_posts", "003_tags"]);

        // Once fixed, the batch resumes where it stopped.
        info.entity().clear_failures();
        assert_eq!(info.up_all().await.unwrap(), ["002_posts", "003_tags"]);
    }

    #[tokio::test]
    async fn test_record_failure_stops_batch() {
        let dir = folder(&["001_users", "002_posts"]);
        let mut info = session(&dir, MemoryEntity::new().fail_record("001_users"));

        let err = info.up_all().await.unwrap_err();
        assert!(matches!(err, MigrateError::Step { ref name, .. } if name == "001_users"));
        assert_eq!(info.status().await.unwrap(), None);
        assert_eq!(info.entity().executed(), ["UP 001_users"]);
    }

    #[tokio::test]
    async fn test_missing_down_script_fails_at_rollback() {
        let dir = folder(&["001_users"]);
        fs::write(dir.path().join("002_posts_up.sql"), "UP 002_posts").unwrap();
        let mut info = session(&dir, MemoryEntity::new());

        info.up_all().await.unwrap();
        let err = info.down_all().await.unwrap_err();
        match err {
            MigrateError::Step {
                name,
                direction,
                source,
            } => {
                assert_eq!(name, "002_posts");
                assert_eq!(direction, Direction::Down);
                assert!(matches!(*source, MigrateError::MissingDownScript(_)));
            }
            other => panic!("Expected step error, got {other:?}"),
        }
        assert_eq!(info.status().await.unwrap().as_deref(), Some("002_posts"));
    }

    #[tokio::test]
    async fn test_unknown_recorded_migration() {
        let dir = folder(&["001_users"]);
        let entity = MemoryEntity::new();
        entity.create_table().await.unwrap();
        entity.record_up("001_users").await.unwrap();
        entity.record_up("002_deleted").await.unwrap();
        let mut info = session(&dir, entity);

        assert!(matches!(
            info.status().await,
            Err(MigrateError::UnknownMigration(name)) if name == "002_deleted"
        ));
        assert!(matches!(
            info.up_all().await,
            Err(MigrateError::UnknownMigration(_))
        ));
        assert_eq!(info.entity().executed().len(), 0);
    }

    #[tokio::test]
    async fn test_verify_detects_out_of_order() {
        let dir = folder(&["001_a", "002_b"]);
        let entity = MemoryEntity::new();
        entity.create_table().await.unwrap();
        entity.record_up("002_b").await.unwrap();
        let mut info = session(&dir, entity);

        assert!(matches!(
            info.verify().await,
            Err(MigrateError::OutOfOrder { name, expected }) if name == "002_b" && expected == "001_a"
        ));
    }

    #[tokio::test]
    async fn test_recorded_gap_blocks_every_operation() {
        let dir = folder(&["001_a", "002_b", "003_c"]);
        let entity = MemoryEntity::new();
        entity.create_table().await.unwrap();
        entity.record_up("001_a").await.unwrap();
        entity.record_up("003_c").await.unwrap();
        let mut info = session(&dir, entity);

        let is_gap = |result: Result<Vec<String>>| {
            matches!(
                result,
                Err(MigrateError::OutOfOrder { name, expected }) if name == "003_c" && expected == "002_b"
            )
        };
        assert!(is_gap(info.up_all().await));
        assert!(is_gap(info.pending().await));
        assert!(is_gap(info.down_all().await));
        assert!(info.status().await.is_err());
        assert!(info.entity().executed().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_middle_file_blocks_rollback() {
        let dir = folder(&["001_a", "002_b", "003_c"]);
        let mut info = session(&dir, MemoryEntity::new());
        info.up_all().await.unwrap();

        fs::remove_file(dir.path().join("002_b_up.sql")).unwrap();
        fs::remove_file(dir.path().join("002_b_down.sql")).unwrap();

        assert!(matches!(
            info.down_all().await,
            Err(MigrateError::UnknownMigration(name)) if name == "002_b"
        ));
        assert!(matches!(
            info.status().await,
            Err(MigrateError::UnknownMigration(_))
        ));
        assert_eq!(info.entity().records().await.unwrap().len(), 3);
        assert_eq!(info.entity().executed().len(), 3);
    }

    #[tokio::test]
    async fn test_creates_table_on_first_use() {
        let dir = folder(&["001_users"]);
        let mut info = session(&dir, MemoryEntity::new());
        assert_eq!(info.state(), SessionState::Uninitialized);
        assert!(!info.entity().has_table());

        assert_eq!(info.status().await.unwrap(), None);
        assert!(info.entity().has_table());
    }

    #[tokio::test]
    async fn test_table_check_failure_is_fatal() {
        let dir = folder(&["001_users"]);
        let mut info = session(&dir, MemoryEntity::new().fail_table_check());

        assert!(matches!(
            info.up_all().await,
            Err(MigrateError::Injected(_))
        ));
        assert_eq!(info.state(), SessionState::Uninitialized);
        assert!(!info.entity().has_table());
        assert!(info.entity().executed().is_empty());
    }

    #[tokio::test]
    async fn test_create_table_failure_is_reported() {
        let dir = folder(&["001_users"]);
        let mut info = session(&dir, MemoryEntity::new().fail_create_table());
        assert!(info.status().await.is_err());
        assert_eq!(info.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_reset() {
        let dir = folder(&["001_a", "002_b"]);
        let mut info = session(&dir, MemoryEntity::new());
        info.up_all().await.unwrap();

        assert_eq!(info.reset().await.unwrap(), ["001_a", "002_b"]);
        assert_eq!(
            info.entity().executed(),
            ["UP 001_a", "UP 002_b", "DOWN 002_b", "DOWN 001_a", "UP 001_a", "UP 002_b"]
        );
        let ids: Vec<u32> = info
            .entity()
            .records()
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, [1, 2]);
    }

    #[tokio::test]
    async fn test_new_files_become_pending() {
        let dir = folder(&["001_a"]);
        let mut info = session(&dir, MemoryEntity::new());
        info.up_all().await.unwrap();

        fs::write(dir.path().join("002_b_up.sql"), "UP 002_b").unwrap();
        assert_eq!(info.pending().await.unwrap(), ["002_b"]);
        assert_eq!(info.up_all().await.unwrap(), ["002_b"]);
    }
}
