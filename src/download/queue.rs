//! Download queue manager
//!
//! One `download_queue` row per asset. Rows move through
//! `pending → downloading → completed | failed`; `failed` rows go back to
//! `pending` through [`DownloadQueue::retry_failed`].
//!
//! Stamping rules applied by [`DownloadQueue::update_status`]:
//! - entering `downloading` sets `started_at`, unless the update is a
//!   progress refresh (`skip_start_time`)
//! - entering `completed` or `failed` sets `completed_at`
//! - `completed` always carries progress 100 and `failed` always carries an
//!   error message

use crate::error::{RelayError, Result};
use crate::storage::models::{now_timestamp, Asset};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::fmt;
use std::str::FromStr;

/// Status of a download job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
        }
    }

    /// Completed or failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Failed)
    }
}

impl FromStr for DownloadStatus {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(DownloadStatus::Pending),
            "downloading" => Ok(DownloadStatus::Downloading),
            "completed" => Ok(DownloadStatus::Completed),
            "failed" => Ok(DownloadStatus::Failed),
            _ => Err(RelayError::InvalidData(format!("Invalid download status: {}", s))),
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional fields of a status transition
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub progress: Option<f64>,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub error: Option<String>,
    /// Progress refresh of a running download; keeps the original `started_at`
    pub skip_start_time: bool,
}

impl StatusUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn bytes(mut self, downloaded: u64, total: u64) -> Self {
        self.downloaded_bytes = Some(downloaded);
        self.total_bytes = Some(total);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    pub fn skip_start_time(mut self) -> Self {
        self.skip_start_time = true;
        self
    }
}

/// Row of the download queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadJob {
    pub id: i64,
    pub asset_id: i64,
    pub collection_id: i64,
    pub status: DownloadStatus,
    pub progress: f64,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub error_message: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Queue row joined with its asset and collection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadJobView {
    #[serde(flatten)]
    pub job: DownloadJob,
    pub asset_title: Option<String>,
    pub asset_index: i64,
    pub asset_external_id: String,
    pub collection_title: String,
}

/// Queue contents with per-status counts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub total: usize,
    pub pending: usize,
    pub downloading: usize,
    pub completed: usize,
    pub failed: usize,
    pub items: Vec<DownloadJobView>,
}

impl QueueStatus {
    fn from_items(items: Vec<DownloadJobView>) -> Self {
        let count = |status: DownloadStatus| items.iter().filter(|i| i.job.status == status).count();
        Self {
            total: items.len(),
            pending: count(DownloadStatus::Pending),
            downloading: count(DownloadStatus::Downloading),
            completed: count(DownloadStatus::Completed),
            failed: count(DownloadStatus::Failed),
            items,
        }
    }
}

const VIEW_SELECT: &str = r#"
    SELECT dq.*,
           e.title AS asset_title,
           e.index_sequence AS asset_index,
           e.external_id AS asset_external_id,
           s.title AS collection_title
    FROM download_queue dq
    JOIN episodes e ON dq.episode_id = e.id
    JOIN series s ON dq.series_id = s.id
"#;

/// Download queue manager
#[derive(Debug, Clone)]
pub struct DownloadQueue {
    pool: SqlitePool,
}

impl DownloadQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Add assets to the queue
    ///
    /// Assets that already have a row (in any status) are left untouched.
    /// Returns the number of rows inserted.
    pub async fn enqueue(&self, collection_id: i64, assets: &[Asset]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for asset in assets {
            let existing: Option<i64> =
                sqlx::query_scalar("SELECT id FROM download_queue WHERE episode_id = ?")
                    .bind(asset.id)
                    .fetch_optional(&mut *tx)
                    .await?;

            if existing.is_some() {
                continue;
            }

            let now = now_timestamp();
            sqlx::query(
                r#"
                INSERT INTO download_queue (episode_id, series_id, status, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(asset.id)
            .bind(collection_id)
            .bind(DownloadStatus::Pending.as_str())
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            inserted += 1;
        }

        tx.commit().await?;

        tracing::debug!(collection_id, inserted, requested = assets.len(), "assets enqueued");
        Ok(inserted)
    }

    /// Transition the job of an asset, applying the stamping rules
    ///
    /// Returns the number of rows changed (0 when the asset was never queued).
    pub async fn update_status(
        &self,
        asset_id: i64,
        status: DownloadStatus,
        update: StatusUpdate,
    ) -> Result<u64> {
        let now = now_timestamp();

        let progress = match (status, update.progress) {
            (DownloadStatus::Completed, _) => Some(100.0),
            (_, progress) => progress,
        };
        let error = match (status, update.error) {
            (DownloadStatus::Failed, None) => Some("Unknown error".to_string()),
            (_, error) => error,
        };

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE download_queue SET ");
        let mut set = qb.separated(", ");
        set.push("status = ").push_bind_unseparated(status.as_str());
        set.push("updated_at = ").push_bind_unseparated(now.clone());

        if let Some(progress) = progress {
            set.push("progress = ").push_bind_unseparated(progress);
        }
        if let Some(downloaded) = update.downloaded_bytes {
            set.push("downloaded_bytes = ").push_bind_unseparated(downloaded as i64);
        }
        if let Some(total) = update.total_bytes {
            set.push("total_bytes = ").push_bind_unseparated(total as i64);
        }
        if let Some(error) = error {
            set.push("error_message = ").push_bind_unseparated(error);
        }
        if status == DownloadStatus::Downloading && !update.skip_start_time {
            set.push("started_at = ").push_bind_unseparated(now.clone());
        }
        if status.is_terminal() {
            set.push("completed_at = ").push_bind_unseparated(now.clone());
        }

        qb.push(" WHERE episode_id = ").push_bind(asset_id);

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Queue contents, oldest first, optionally for one collection
    pub async fn queue_status(&self, collection_id: Option<i64>) -> Result<QueueStatus> {
        let rows = match collection_id {
            Some(id) => {
                sqlx::query(&format!(
                    "{} WHERE dq.series_id = ? ORDER BY dq.created_at ASC, dq.id ASC",
                    VIEW_SELECT
                ))
                .bind(id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("{} ORDER BY dq.created_at ASC, dq.id ASC", VIEW_SELECT))
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let items = rows
            .iter()
            .map(row_to_view)
            .collect::<Result<Vec<_>>>()?;

        Ok(QueueStatus::from_items(items))
    }

    /// Oldest pending jobs, up to `limit`
    pub async fn next_pending(&self, limit: i64) -> Result<Vec<DownloadJobView>> {
        let rows = sqlx::query(&format!(
            "{} WHERE dq.status = ? ORDER BY dq.created_at ASC, dq.id ASC LIMIT ?",
            VIEW_SELECT
        ))
        .bind(DownloadStatus::Pending.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_view).collect()
    }

    /// Job of a single asset
    pub async fn get_job(&self, asset_id: i64) -> Result<Option<DownloadJob>> {
        let row = sqlx::query("SELECT * FROM download_queue WHERE episode_id = ?")
            .bind(asset_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    /// Delete completed and failed jobs; pending and running jobs are kept
    pub async fn clear(&self, collection_id: Option<i64>) -> Result<u64> {
        let result = match collection_id {
            Some(id) => {
                sqlx::query(
                    "DELETE FROM download_queue WHERE status IN ('completed', 'failed') AND series_id = ?",
                )
                .bind(id)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query("DELETE FROM download_queue WHERE status IN ('completed', 'failed')")
                    .execute(&self.pool)
                    .await?
            }
        };

        let cleared = result.rows_affected();
        tracing::info!(?collection_id, cleared, "download queue cleared");
        Ok(cleared)
    }

    /// Move failed jobs back to pending and drop their error
    pub async fn retry_failed(&self, collection_id: Option<i64>) -> Result<u64> {
        let now = now_timestamp();
        let result = match collection_id {
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE download_queue
                    SET status = 'pending', error_message = NULL, updated_at = ?
                    WHERE status = 'failed' AND series_id = ?
                    "#,
                )
                .bind(&now)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE download_queue
                    SET status = 'pending', error_message = NULL, updated_at = ?
                    WHERE status = 'failed'
                    "#,
                )
                .bind(&now)
                .execute(&self.pool)
                .await?
            }
        };

        let reset = result.rows_affected();
        tracing::info!(?collection_id, reset, "failed downloads reset to pending");
        Ok(reset)
    }
}

fn row_to_job(row: &SqliteRow) -> Result<DownloadJob> {
    let status_str: String = row.try_get("status")?;

    Ok(DownloadJob {
        id: row.try_get("id")?,
        asset_id: row.try_get("episode_id")?,
        collection_id: row.try_get("series_id")?,
        status: status_str.parse()?,
        progress: row.try_get("progress")?,
        downloaded_bytes: row.try_get::<i64, _>("downloaded_bytes")? as u64,
        total_bytes: row.try_get::<i64, _>("total_bytes")? as u64,
        error_message: row.try_get("error_message")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_view(row: &SqliteRow) -> Result<DownloadJobView> {
    Ok(DownloadJobView {
        job: row_to_job(row)?,
        asset_title: row.try_get("asset_title")?,
        asset_index: row.try_get("asset_index")?,
        asset_external_id: row.try_get("asset_external_id")?,
        collection_title: row.try_get("collection_title")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::{NewAsset, NewCollection};
    use crate::storage::{queries, Database};

    async fn setup(asset_count: i64) -> (Database, DownloadQueue, i64, Vec<Asset>) {
        let db = Database::new_in_memory().await.unwrap();
        let collection_id =
            queries::upsert_collection(db.pool(), &NewCollection::new("S-1", "Series One"))
                .await
                .unwrap();
        for index in 1..=asset_count {
            queries::upsert_asset(db.pool(), collection_id, &NewAsset::new(format!("V-{}", index), index))
                .await
                .unwrap();
        }
        let assets = queries::list_assets(db.pool(), collection_id).await.unwrap();
        let queue = DownloadQueue::new(db.pool().clone());
        (db, queue, collection_id, assets)
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let (_db, queue, collection_id, assets) = setup(3).await;

        assert_eq!(queue.enqueue(collection_id, &assets).await.unwrap(), 3);
        queue
            .update_status(assets[0].id, DownloadStatus::Failed, StatusUpdate::new().error("boom"))
            .await
            .unwrap();

        // Existing rows are never duplicated or reset
        assert_eq!(queue.enqueue(collection_id, &assets).await.unwrap(), 0);

        let status = queue.queue_status(Some(collection_id)).await.unwrap();
        assert_eq!(status.total, 3);
        assert_eq!(status.failed, 1);
        assert_eq!(status.pending, 2);
    }

    #[tokio::test]
    async fn test_status_stamping() {
        let (_db, queue, collection_id, assets) = setup(2).await;
        queue.enqueue(collection_id, &assets).await.unwrap();
        let asset_id = assets[0].id;

        queue
            .update_status(asset_id, DownloadStatus::Downloading, StatusUpdate::new().progress(0.0))
            .await
            .unwrap();
        let job = queue.get_job(asset_id).await.unwrap().unwrap();
        let started_at = job.started_at.clone().unwrap();
        assert!(job.completed_at.is_none());

        queue
            .update_status(
                asset_id,
                DownloadStatus::Downloading,
                StatusUpdate::new().progress(40.0).bytes(40, 100).skip_start_time(),
            )
            .await
            .unwrap();
        let job = queue.get_job(asset_id).await.unwrap().unwrap();
        assert_eq!(job.started_at.as_deref(), Some(started_at.as_str()));
        assert_eq!(job.downloaded_bytes, 40);

        queue
            .update_status(asset_id, DownloadStatus::Completed, StatusUpdate::new())
            .await
            .unwrap();
        let job = queue.get_job(asset_id).await.unwrap().unwrap();
        assert_eq!(job.status, DownloadStatus::Completed);
        assert_eq!(job.progress, 100.0);
        assert!(job.completed_at.is_some());

        queue
            .update_status(assets[1].id, DownloadStatus::Failed, StatusUpdate::new())
            .await
            .unwrap();
        let job = queue.get_job(assets[1].id).await.unwrap().unwrap();
        assert!(job.error_message.is_some());
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_update_unknown_asset_changes_nothing() {
        let (_db, queue, _collection_id, _assets) = setup(1).await;
        let changed = queue
            .update_status(999, DownloadStatus::Completed, StatusUpdate::new())
            .await
            .unwrap();
        assert_eq!(changed, 0);
    }

    #[tokio::test]
    async fn test_clear_keeps_active_jobs() {
        let (_db, queue, collection_id, assets) = setup(4).await;
        queue.enqueue(collection_id, &assets).await.unwrap();

        queue
            .update_status(assets[0].id, DownloadStatus::Completed, StatusUpdate::new())
            .await
            .unwrap();
        queue
            .update_status(assets[1].id, DownloadStatus::Failed, StatusUpdate::new().error("x"))
            .await
            .unwrap();
        queue
            .update_status(assets[2].id, DownloadStatus::Downloading, StatusUpdate::new())
            .await
            .unwrap();

        assert_eq!(queue.clear(Some(collection_id)).await.unwrap(), 2);

        let status = queue.queue_status(None).await.unwrap();
        assert_eq!(status.total, 2);
        assert_eq!(status.downloading, 1);
        assert_eq!(status.pending, 1);
    }

    #[tokio::test]
    async fn test_retry_failed_is_scoped() {
        let (db, queue, collection_id, assets) = setup(2).await;
        let other_id = queries::upsert_collection(db.pool(), &NewCollection::new("S-2", "Series Two"))
            .await
            .unwrap();
        queries::upsert_asset(db.pool(), other_id, &NewAsset::new("W-1", 1))
            .await
            .unwrap();
        let other_assets = queries::list_assets(db.pool(), other_id).await.unwrap();

        queue.enqueue(collection_id, &assets).await.unwrap();
        queue.enqueue(other_id, &other_assets).await.unwrap();
        for asset in assets.iter().chain(other_assets.iter()) {
            queue
                .update_status(asset.id, DownloadStatus::Failed, StatusUpdate::new().error("timeout"))
                .await
                .unwrap();
        }

        assert_eq!(queue.retry_failed(Some(collection_id)).await.unwrap(), 2);

        let job = queue.get_job(assets[0].id).await.unwrap().unwrap();
        assert_eq!(job.status, DownloadStatus::Pending);
        assert!(job.error_message.is_none());

        let untouched = queue.get_job(other_assets[0].id).await.unwrap().unwrap();
        assert_eq!(untouched.status, DownloadStatus::Failed);

        assert_eq!(queue.retry_failed(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_next_pending_in_insertion_order() {
        let (_db, queue, collection_id, assets) = setup(3).await;
        queue.enqueue(collection_id, &assets).await.unwrap();

        let next = queue.next_pending(2).await.unwrap();
        let order: Vec<i64> = next.iter().map(|v| v.asset_index).collect();
        assert_eq!(order, vec![1, 2]);
        assert_eq!(next[0].collection_title, "Series One");
    }
}
