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


//! Upload schedule rows
//!
//! One `upload_schedule` row per asset, created by the schedule builder.
//! `retry_count` counts failed attempts: a job whose count reaches
//! [`MAX_UPLOAD_ATTEMPTS`] is `skipped` and never selected again.

use crate::error::{RelayError, Result};
use crate::storage::models::{now_timestamp, parse_db_timestamp, to_db_timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::fmt;
use std::str::FromStr;

/// Attempts an upload job gets before it is skipped
pub const MAX_UPLOAD_ATTEMPTS: i64 = 3;

/// Status of an upload job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
    Skipped,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
            UploadStatus::Skipped => "skipped",
        }
    }

    /// Completed or skipped; failed jobs are still eligible
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Completed | UploadStatus::Skipped)
    }
}

impl FromStr for UploadStatus {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(UploadStatus::Pending),
            "uploading" => Ok(UploadStatus::Uploading),
            "completed" => Ok(UploadStatus::Completed),
            "failed" => Ok(UploadStatus::Failed),
            "skipped" => Ok(UploadStatus::Skipped),
            _ => Err(RelayError::InvalidData(format!("Invalid upload status: {}", s))),
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status after a failed attempt, given the stored count before it
pub fn failure_outcome(previous_retry_count: i64) -> (UploadStatus, i64) {
    let attempts = previous_retry_count + 1;
    if attempts >= MAX_UPLOAD_ATTEMPTS {
        (UploadStatus::Skipped, attempts)
    } else {
        (UploadStatus::Failed, attempts)
    }
}

/// Row of the upload schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadJob {
    pub id: i64,
    pub collection_id: i64,
    pub asset_id: i64,
    pub scheduled_at: DateTime<Utc>,
    pub status: UploadStatus,
    pub upload_progress: i64,
    pub remote_video_id: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
}

/// Schedule row joined with its asset and collection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadJobView {
    #[serde(flatten)]
    pub job: UploadJob,
    pub asset_title: Option<String>,
    pub asset_index: i64,
    pub video_path: Option<String>,
    pub collection_title: String,
    pub collection_description: String,
}

impl UploadJobView {
    /// Title of the republished video
    pub fn remote_title(&self) -> String {
        format!("{} - Episode {}", self.collection_title, self.asset_index)
    }
}

/// Optional fields of an upload status transition
#[derive(Debug, Clone, Default)]
pub struct UploadUpdate {
    pub progress: Option<i64>,
    pub remote_video_id: Option<String>,
    pub error: Option<String>,
    pub retry_count: Option<i64>,
    /// Progress refresh of a running upload; keeps the original `started_at`
    pub skip_start_time: bool,
}

impl UploadUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(mut self, progress: i64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn remote_video_id(mut self, id: impl Into<String>) -> Self {
        self.remote_video_id = Some(id.into());
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    pub fn retry_count(mut self, count: i64) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn skip_start_time(mut self) -> Self {
        self.skip_start_time = true;
        self
    }
}

pub(crate) const VIEW_SELECT: &str = r#"
    SELECT us.*,
           e.title AS asset_title,
           e.index_sequence AS asset_index,
           e.path AS video_path,
           s.title AS collection_title,
           s.description AS collection_description
    FROM upload_schedule us
    JOIN episodes e ON us.episode_id = e.id
    JOIN series s ON us.series_id = s.id
"#;

/// Transition a job
///
/// `uploading` stamps `started_at` unless `skip_start_time` is set;
/// `completed`, `failed` and `skipped` stamp `completed_at`.
pub async fn update_upload_status(
    pool: &SqlitePool,
    job_id: i64,
    status: UploadStatus,
    update: UploadUpdate,
) -> Result<u64> {
    let now = now_timestamp();

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE upload_schedule SET ");
    let mut set = qb.separated(", ");
    set.push("status = ").push_bind_unseparated(status.as_str());
    set.push("updated_at = ").push_bind_unseparated(now.clone());

    if let Some(progress) = update.progress {
        set.push("upload_progress = ").push_bind_unseparated(progress);
    }
    if let Some(remote_id) = update.remote_video_id {
        set.push("remote_video_id = ").push_bind_unseparated(remote_id);
    }
    if let Some(error) = update.error {
        set.push("error_message = ").push_bind_unseparated(error);
    }
    if let Some(count) = update.retry_count {
        set.push("retry_count = ").push_bind_unseparated(count);
    }
    if status == UploadStatus::Uploading && !update.skip_start_time {
        set.push("started_at = ").push_bind_unseparated(now.clone());
    }
    if matches!(status, UploadStatus::Completed | UploadStatus::Failed | UploadStatus::Skipped) {
        set.push("completed_at = ").push_bind_unseparated(now.clone());
    }

    qb.push(" WHERE id = ").push_bind(job_id);

    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected())
}

/// Record a failed attempt, reading the stored count at failure time
///
/// Returns the new status and retry count.
pub async fn record_failure(pool: &SqlitePool, job_id: i64, error: &str) -> Result<(UploadStatus, i64)> {
    let previous: i64 = sqlx::query_scalar("SELECT retry_count FROM upload_schedule WHERE id = ?")
        .bind(job_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| RelayError::internal(format!("Upload job {} disappeared", job_id)))?;

    let (status, retry_count) = failure_outcome(previous);
    let message = match status {
        UploadStatus::Skipped => RelayError::RetriesExhausted(error.to_string()).to_string(),
        _ => error.to_string(),
    };

    update_upload_status(
        pool,
        job_id,
        status,
        UploadUpdate::new().error(message).retry_count(retry_count),
    )
    .await?;

    Ok((status, retry_count))
}

/// Single job by id
pub async fn get_upload_job(pool: &SqlitePool, job_id: i64) -> Result<Option<UploadJob>> {
    let row = sqlx::query("SELECT * FROM upload_schedule WHERE id = ?")
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_job).transpose()
}

/// Earliest eligible job at `now`
///
/// Eligible: `pending` or `failed`, due, and under the attempt limit.
/// Ties on `scheduled_at` go to the lowest id.
pub async fn next_due_job(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Option<UploadJobView>> {
    let row = sqlx::query(&format!(
        r#"{}
        WHERE us.status IN ('pending', 'failed')
          AND us.scheduled_at <= ?
          AND us.retry_count < ?
        ORDER BY us.scheduled_at ASC, us.id ASC
        LIMIT 1
        "#,
        VIEW_SELECT
    ))
    .bind(to_db_timestamp(now))
    .bind(MAX_UPLOAD_ATTEMPTS)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_view).transpose()
}

pub(crate) fn row_to_job(row: &SqliteRow) -> Result<UploadJob> {
    let status_str: String = row.try_get("status")?;
    let scheduled_at: String = row.try_get("scheduled_at")?;

    Ok(UploadJob {
        id: row.try_get("id")?,
        collection_id: row.try_get("series_id")?,
        asset_id: row.try_get("episode_id")?,
        scheduled_at: parse_db_timestamp(&scheduled_at)?,
        status: status_str.parse()?,
        upload_progress: row.try_get("upload_progress")?,
        remote_video_id: row.try_get("remote_video_id")?,
        error_message: row.try_get("error_message")?,
        retry_count: row.try_get("retry_count")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn row_to_view(row: &SqliteRow) -> Result<UploadJobView> {
    Ok(UploadJobView {
        job: row_to_job(row)?,
        asset_title: row.try_get("asset_title")?,
        asset_index: row.try_get("asset_index")?,
        video_path: row.try_get("video_path")?,
        collection_title: row.try_get("collection_title")?,
        collection_description: row.try_get("collection_description")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_outcome() {
        assert_eq!(failure_outcome(0), (UploadStatus::Failed, 1));
        assert_eq!(failure_outcome(1), (UploadStatus::Failed, 2));
        assert_eq!(failure_outcome(2), (UploadStatus::Skipped, 3));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("skipped".parse::<UploadStatus>().unwrap(), UploadStatus::Skipped);
        assert!("paused".parse::<UploadStatus>().is_err());
        assert!(UploadStatus::Completed.is_terminal());
        assert!(!UploadStatus::Failed.is_terminal());
    }
}
