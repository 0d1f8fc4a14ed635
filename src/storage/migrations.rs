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


//! Schema migrations
//!
//! Each migration is a numbered SQL script applied inside its own
//! transaction together with its `_migrations` record, so a script is
//! either fully applied and recorded or not at all.

use crate::error::Result;
use sqlx::{Executor, SqlitePool};

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Collections (series) and their assets (episodes), owned by catalog ingestion
const CATALOG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS series (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    cover_url TEXT,
    episode_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS episodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    series_id INTEGER NOT NULL,
    external_id TEXT NOT NULL UNIQUE,
    title TEXT,
    index_sequence INTEGER NOT NULL,
    duration INTEGER,
    video_width INTEGER,
    video_height INTEGER,
    cover TEXT,
    path TEXT,  -- NULL until a download has written the file
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (series_id) REFERENCES series(id) ON DELETE CASCADE,
    UNIQUE(series_id, index_sequence)
);

CREATE INDEX IF NOT EXISTS idx_episodes_series_id ON episodes(series_id);
CREATE INDEX IF NOT EXISTS idx_episodes_path ON episodes(path);
"#;

/// Download queue and upload schedule
///
/// No uniqueness constraint on `episode_id`: enqueue and scheduling are
/// insert-if-absent at the application level.
const JOB_QUEUES: &str = r#"
CREATE TABLE IF NOT EXISTS download_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    episode_id INTEGER NOT NULL,
    series_id INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',  -- pending, downloading, completed, failed
    progress REAL NOT NULL DEFAULT 0,
    downloaded_bytes INTEGER NOT NULL DEFAULT 0,
    total_bytes INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    started_at TEXT,
    completed_at TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (episode_id) REFERENCES episodes(id) ON DELETE CASCADE,
    FOREIGN KEY (series_id) REFERENCES series(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_download_queue_episode ON download_queue(episode_id);
CREATE INDEX IF NOT EXISTS idx_download_queue_status ON download_queue(status, created_at);
CREATE INDEX IF NOT EXISTS idx_download_queue_series ON download_queue(series_id);

CREATE TABLE IF NOT EXISTS upload_schedule (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    series_id INTEGER NOT NULL,
    episode_id INTEGER NOT NULL,
    scheduled_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',  -- pending, uploading, completed, failed, skipped
    upload_progress INTEGER NOT NULL DEFAULT 0,
    remote_video_id TEXT,
    error_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    started_at TEXT,
    completed_at TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (episode_id) REFERENCES episodes(id) ON DELETE CASCADE,
    FOREIGN KEY (series_id) REFERENCES series(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_upload_schedule_episode ON upload_schedule(episode_id);
CREATE INDEX IF NOT EXISTS idx_upload_schedule_due ON upload_schedule(status, scheduled_at, id);
CREATE INDEX IF NOT EXISTS idx_upload_schedule_series ON upload_schedule(series_id);
"#;

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "catalog_schema",
        sql: CATALOG_SCHEMA,
    },
    Migration {
        version: 2,
        name: "job_queues",
        sql: JOB_QUEUES,
    },
];

/// Apply every migration newer than the recorded schema version
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .await?;

    let current = schema_version(pool).await?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let mut tx = pool.begin().await?;
        (&mut *tx).execute(migration.sql).await?;
        sqlx::query("INSERT INTO _migrations (id, name) VALUES (?, ?)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(version = migration.version, name = migration.name, "migration applied");
    }

    Ok(())
}

/// Highest applied migration, 0 for a fresh database
pub async fn schema_version(pool: &SqlitePool) -> Result<i64> {
    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM _migrations")
        .fetch_one(pool)
        .await?;
    Ok(version.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::Database;

    async fn table_names(pool: &SqlitePool) -> Vec<String> {
        sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_schema_created() {
        let db = Database::new_in_memory().await.unwrap();

        assert_eq!(
            table_names(db.pool()).await,
            vec!["_migrations", "download_queue", "episodes", "series", "upload_schedule"]
        );
        assert_eq!(schema_version(db.pool()).await.unwrap(), MIGRATIONS.len() as i64);
    }

    #[tokio::test]
    async fn test_rerun_is_a_no_op() {
        let db = Database::new_in_memory().await.unwrap();
        run_migrations(db.pool()).await.unwrap();

        let recorded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _migrations")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(recorded, 2);
    }

    #[tokio::test]
    async fn test_series_delete_cascades_to_jobs() {
        let db = Database::new_in_memory().await.unwrap();
        let pool = db.pool();

        sqlx::query("INSERT INTO series (id, external_id, title) VALUES (1, 'S-1', 'One')")
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO episodes (id, series_id, external_id, index_sequence) VALUES (10, 1, 'V-1', 1)")
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO download_queue (episode_id, series_id) VALUES (10, 1)")
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO upload_schedule (episode_id, series_id, scheduled_at) VALUES (10, 1, '2025-06-01T11:00:00.000Z')")
            .execute(pool)
            .await
            .unwrap();

        sqlx::query("DELETE FROM series WHERE id = 1").execute(pool).await.unwrap();

        for table in ["episodes", "download_queue", "upload_schedule"] {
            let left: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(pool)
                .await
                .unwrap();
            assert_eq!(left, 0, "{} rows survived the delete", table);
        }
    }
}
