//! In-process backend.
//!
//! Keeps the tracking table in memory and logs every executed script instead
//! of running it. Failures can be injected at each contract operation, which
//! makes it the backend of choice for exercising the engine's partial-failure
//! handling.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use crate::config::BackendConfig;
use crate::entity::{Entity, MigrationRecord, next_sequence};
use crate::error::{MigrateError, Result};

#[derive(Debug, Default)]
struct MemoryState {
    table: bool,
    records: Vec<MigrationRecord>,
    next_id: u32,
    executed: Vec<String>,
    fail_script: Option<String>,
    fail_record: Option<String>,
    fail_table_check: bool,
    fail_create_table: bool,
}

/// Migration backend holding its tracking table in memory.
#[derive(Debug, Default)]
pub struct MemoryEntity {
    state: Mutex<MemoryState>,
}

impl MemoryEntity {
    /// Creates a backend without a tracking table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails `migrate` for any script containing `needle`.
    #[must_use]
    pub fn fail_script(self, needle: impl Into<String>) -> Self {
        self.state().fail_script = Some(needle.into());
        self
    }

    /// Fails `record_up` and `record_down` for `name`.
    #[must_use]
    pub fn fail_record(self, name: impl Into<String>) -> Self {
        self.state().fail_record = Some(name.into());
        self
    }

    /// Fails `table_exist` as if the connection were lost.
    #[must_use]
    pub fn fail_table_check(self) -> Self {
        self.state().fail_table_check = true;
        self
    }

    /// Fails `create_table` as if privileges were missing.
    #[must_use]
    pub fn fail_create_table(self) -> Self {
        self.state().fail_create_table = true;
        self
    }

    /// Stops injecting script failures.
    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.fail_script = None;
        state.fail_record = None;
        state.fail_table_check = false;
        state.fail_create_table = false;
    }

    /// Returns every script executed so far, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    /// Returns whether the tracking table has been created.
    #[must_use]
    pub fn has_table(&self) -> bool {
        self.state().table
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_table(state: &MemoryState) -> Result<()> {
        if state.table {
            Ok(())
        } else {
            Err(MigrateError::Injected("no tracking table".to_string()))
        }
    }

    fn check_record(state: &MemoryState, name: &str) -> Result<()> {
        Self::require_table(state)?;
        if state.fail_record.as_deref() == Some(name) {
            return Err(MigrateError::Injected(format!("record {name}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Entity for MemoryEntity {
    fn extension(&self) -> &'static str {
        ".sql"
    }

    fn update_config(_config: &mut BackendConfig) {}

    async fn table_exist(&self) -> Result<bool> {
        let state = self.state();
        if state.fail_table_check {
            return Err(MigrateError::Injected("table check".to_string()));
        }
        Ok(state.table)
    }

    async fn create_table(&self) -> Result<()> {
        let mut state = self.state();
        if state.fail_create_table {
            return Err(MigrateError::Injected("create table".to_string()));
        }
        if !state.table {
            state.table = true;
            state.next_id = 1;
        }
        Ok(())
    }

    async fn latest(&self) -> Result<Option<MigrationRecord>> {
        let state = self.state();
        Self::require_table(&state)?;
        Ok(state.records.last().cloned())
    }

    async fn records(&self) -> Result<Vec<MigrationRecord>> {
        let state = self.state();
        Self::require_table(&state)?;
        Ok(state.records.clone())
    }

    async fn migrate(&self, script: &str) -> Result<()> {
        let mut state = self.state();
        if let Some(needle) = &state.fail_script {
            if script.contains(needle.as_str()) {
                return Err(MigrateError::Injected(format!("script {needle}")));
            }
        }
        state.executed.push(script.to_string());
        Ok(())
    }

    async fn record_up(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        Self::check_record(&state, name)?;
        if state.records.iter().any(|r| r.name == name) {
            return Err(MigrateError::Injected(format!("duplicate record {name}")));
        }
        let id = state.next_id;
        state.next_id += 1;
        state.records.push(MigrationRecord {
            id,
            name: name.to_string(),
            created_at: Utc::now().naive_utc(),
        });
        Ok(())
    }

    async fn record_down(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        Self::check_record(&state, name)?;
        let index = state
            .records
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| MigrateError::NotRecorded(name.to_string()))?;
        state.records.remove(index);
        state.next_id = next_sequence(state.records.last().map(|r| r.id));
        Ok(())
    }
}
