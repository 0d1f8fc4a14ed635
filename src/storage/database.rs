// SeriesRelay - catalog mirroring and scheduled republishing
// Copyright (C) 2025 SeriesRelay contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! SQLite store handle
//!
//! File databases run in WAL mode with foreign keys on, so observers can
//! read queue snapshots while a download batch or the scheduler writes.
//! Every queue write touches a single row, so a long busy timeout is enough
//! to serialise writers.
//!
//! The in-memory variant keeps exactly one connection alive for the life of
//! the pool; a second connection would open a separate, empty database.

use crate::error::{RelayError, Result};
use crate::storage::migrations;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::ConnectOptions;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const FILE_POOL_SIZE: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared handle to the relay store
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (creating if needed) the database file and migrate it
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let path = database_path.as_ref();
        ensure_parent_dir(path)?;

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(FILE_POOL_SIZE)
            .acquire_timeout(BUSY_TIMEOUT)
            .connect_with(options)
            .await?;

        Self::ready(pool, Some(path.to_path_buf())).await
    }

    /// Private in-memory database, migrated and empty
    pub async fn new_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .foreign_keys(true)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::ready(pool, None).await
    }

    async fn ready(pool: SqlitePool, path: Option<PathBuf>) -> Result<Self> {
        let db = Self { pool, path };
        db.migrate().await?;

        match &db.path {
            Some(path) => tracing::debug!(path = %path.display(), "database ready"),
            None => tracing::debug!("in-memory database ready"),
        }
        Ok(db)
    }

    /// Bring the schema up to date
    pub async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool)
            .await
            .map_err(|e| RelayError::MigrationFailed(e.to_string()))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Database file, `None` when in memory
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn close(self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    /// `PRAGMA integrity_check` reported no problems
    pub async fn check_integrity(&self) -> Result<bool> {
        let verdict: String = sqlx::query_scalar("PRAGMA integrity_check")
            .fetch_one(&self.pool)
            .await?;
        Ok(verdict == "ok")
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => return Ok(()),
    };

    std::fs::create_dir_all(parent).map_err(|e| {
        RelayError::InvalidConfiguration(format!(
            "Cannot create database directory {}: {}",
            parent.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_is_private() {
        let first = Database::new_in_memory().await.unwrap();
        let second = Database::new_in_memory().await.unwrap();

        sqlx::query("INSERT INTO series (external_id, title) VALUES ('S-1', 'One')")
            .execute(first.pool())
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM series")
            .fetch_one(second.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(first.path().is_none());
    }

    #[tokio::test]
    async fn test_file_database_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("relay.db");

        let db = Database::new(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), Some(path.as_path()));
        assert!(db.check_integrity().await.unwrap());
        db.close().await.unwrap();

        // Reopening keeps the schema and does not re-run migrations
        let db = Database::new(&path).await.unwrap();
        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _migrations")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(applied, 2);
    }
}
