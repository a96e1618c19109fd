#![allow(dead_code)]

use std::fs;
use std::path::Path;

use oxide_script_migrate::prelude::*;
use tempfile::TempDir;

/// Writes `(name, up, down)` script pairs into a fresh folder.
pub fn migrations(scripts: &[(&str, &str, &str)]) -> TempDir {
    let dir = TempDir::new().expect("Failed to create migration folder");
    for (name, up, down) in scripts {
        write(dir.path(), &format!("{name}_up.sql"), up);
        write(dir.path(), &format!("{name}_down.sql"), down);
    }
    dir
}

pub fn write(dir: &Path, file: &str, contents: &str) {
    fs::write(dir.join(file), contents)
        .unwrap_or_else(|e| panic!("Failed to write {file}: {e}"));
}

/// Opens a session on a private in-memory SQLite database.
pub async fn memory_session(dir: &TempDir) -> Info<SqliteEntity> {
    let entity = SqliteEntity::connect(&BackendConfig::new(":memory:"), true)
        .await
        .expect("Failed to open in-memory SQLite database");
    Info::new(entity, dir.path())
}

/// User tables and their DDL, excluding the tracking table.
pub async fn schema(info: &Info<SqliteEntity>) -> Vec<(String, String)> {
    sqlx::query_as(
        "SELECT name, sql FROM sqlite_master
         WHERE type = 'table' AND name NOT IN ('migration', 'sqlite_sequence')
         ORDER BY name",
    )
    .fetch_all(info.entity().pool())
    .await
    .expect("Failed to read schema")
}

pub async fn table_names(info: &Info<SqliteEntity>) -> Vec<String> {
    schema(info).await.into_iter().map(|(name, _)| name).collect()
}

pub fn users_and_posts() -> TempDir {
    migrations(&[
        (
            "001_users",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, username TEXT NOT NULL UNIQUE);",
            "DROP TABLE users;",
        ),
        (
            "002_posts",
            "CREATE TABLE posts (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id),
                title TEXT NOT NULL
            );
            CREATE INDEX idx_posts_user ON posts(user_id);",
            "DROP INDEX idx_posts_user;
            DROP TABLE posts;",
        ),
    ])
}
