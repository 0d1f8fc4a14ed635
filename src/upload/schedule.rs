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


//! Upload timetable
//!
//! A fully downloaded collection is laid out on an hourly timetable: the
//! first asset at the next top of the hour, each following asset one hour
//! later, in position order. Building is atomic and idempotent: assets that
//! already have a row keep it and do not consume a slot.

use super::jobs::{row_to_view, UploadJobView, UploadStatus, VIEW_SELECT};
use crate::error::{RelayError, Result};
use crate::storage::models::{now_timestamp, to_db_timestamp, Asset, Collection};
use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// Result of building a collection's timetable
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleReceipt {
    pub collection_id: i64,
    pub collection_title: String,
    /// Rows inserted by this call
    pub scheduled: u64,
    /// Assets that already had a row
    pub already_scheduled: u64,
    /// First slot handed out by this call
    pub first_slot: DateTime<Utc>,
    pub created_at: String,
}

/// Timetable rows of one collection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchedule {
    pub collection_id: i64,
    pub collection_title: String,
    pub items: Vec<UploadJobView>,
}

/// Timetable contents with per-status counts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSchedule {
    pub total: usize,
    pub pending: usize,
    pub uploading: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub items: Vec<UploadJobView>,
    pub by_collection: Vec<CollectionSchedule>,
}

impl UploadSchedule {
    fn from_items(items: Vec<UploadJobView>) -> Self {
        let count = |status: UploadStatus| items.iter().filter(|i| i.job.status == status).count();

        let mut by_collection: Vec<CollectionSchedule> = Vec::new();
        for item in &items {
            match by_collection
                .iter_mut()
                .find(|group| group.collection_id == item.job.collection_id)
            {
                Some(group) => group.items.push(item.clone()),
                None => by_collection.push(CollectionSchedule {
                    collection_id: item.job.collection_id,
                    collection_title: item.collection_title.clone(),
                    items: vec![item.clone()],
                }),
            }
        }

        Self {
            total: items.len(),
            pending: count(UploadStatus::Pending),
            uploading: count(UploadStatus::Uploading),
            completed: count(UploadStatus::Completed),
            failed: count(UploadStatus::Failed),
            skipped: count(UploadStatus::Skipped),
            items,
            by_collection,
        }
    }
}

/// First slot for a timetable built at `now`
///
/// `now` truncated to the hour, plus one hour unless `now` has zero
/// minutes. Seconds do not count: 10:00:30 maps to 10:00.
pub fn first_slot(now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    use chrono::Timelike;

    let truncated = now
        .duration_trunc(Duration::hours(1))
        .map_err(|e| RelayError::internal(format!("Failed to align schedule: {}", e)))?;

    if now.minute() > 0 {
        Ok(truncated + Duration::hours(1))
    } else {
        Ok(truncated)
    }
}

/// Builds and edits the upload timetable
#[derive(Debug, Clone)]
pub struct ScheduleBuilder {
    pool: SqlitePool,
}

impl ScheduleBuilder {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Schedule every asset of a collection starting from the current time
    pub async fn build_schedule(&self, collection_id: i64) -> Result<ScheduleReceipt> {
        self.build_schedule_at(collection_id, Utc::now()).await
    }

    /// Schedule every asset of a collection as if the time were `now`
    ///
    /// Fails without writing anything when the collection is unknown, has
    /// no downloaded asset, or has any asset still missing its file.
    pub async fn build_schedule_at(&self, collection_id: i64, now: DateTime<Utc>) -> Result<ScheduleReceipt> {
        let mut tx = self.pool.begin().await?;

        let collection = sqlx::query_as::<_, Collection>("SELECT * FROM series WHERE id = ?")
            .bind(collection_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RelayError::CollectionNotFound(collection_id))?;

        let downloaded = sqlx::query_as::<_, Asset>(
            r#"
            SELECT * FROM episodes
            WHERE series_id = ? AND path IS NOT NULL AND path != ''
            ORDER BY index_sequence ASC
            "#,
        )
        .bind(collection_id)
        .fetch_all(&mut *tx)
        .await?;

        if downloaded.is_empty() {
            return Err(RelayError::NoDownloadedAssets);
        }

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM episodes WHERE series_id = ?")
            .bind(collection_id)
            .fetch_one(&mut *tx)
            .await?;

        if (downloaded.len() as i64) < total {
            return Err(RelayError::IncompleteDownloads {
                downloaded: downloaded.len() as i64,
                total,
            });
        }

        let start = first_slot(now)?;
        let mut slot = start;
        let mut scheduled = 0u64;
        let mut already_scheduled = 0u64;
        let created_at = now_timestamp();

        for asset in &downloaded {
            let existing: Option<i64> =
                sqlx::query_scalar("SELECT id FROM upload_schedule WHERE episode_id = ?")
                    .bind(asset.id)
                    .fetch_optional(&mut *tx)
                    .await?;

            if existing.is_some() {
                already_scheduled += 1;
                continue;
            }

            sqlx::query(
                r#"
                INSERT INTO upload_schedule (series_id, episode_id, scheduled_at, status, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(collection_id)
            .bind(asset.id)
            .bind(to_db_timestamp(slot))
            .bind(UploadStatus::Pending.as_str())
            .bind(&created_at)
            .bind(&created_at)
            .execute(&mut *tx)
            .await?;

            scheduled += 1;
            slot += Duration::hours(1);
        }

        tx.commit().await?;

        tracing::info!(
            collection_id,
            scheduled,
            already_scheduled,
            first_slot = %start,
            "upload schedule built"
        );

        Ok(ScheduleReceipt {
            collection_id,
            collection_title: collection.title,
            scheduled,
            already_scheduled,
            first_slot: start,
            created_at,
        })
    }

    /// Timetable in slot order, optionally for one collection
    pub async fn list_schedule(&self, collection_id: Option<i64>) -> Result<UploadSchedule> {
        let rows = match collection_id {
            Some(id) => {
                sqlx::query(&format!(
                    "{} WHERE us.series_id = ? ORDER BY us.scheduled_at ASC, us.id ASC",
                    VIEW_SELECT
                ))
                .bind(id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("{} ORDER BY us.scheduled_at ASC, us.id ASC", VIEW_SELECT))
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let items = rows.iter().map(row_to_view).collect::<Result<Vec<_>>>()?;
        Ok(UploadSchedule::from_items(items))
    }

    /// Drop the pending and failed rows of a collection
    ///
    /// Running, completed and skipped rows stay as history.
    pub async fn remove_from_schedule(&self, collection_id: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM upload_schedule WHERE series_id = ? AND status IN ('pending', 'failed')",
        )
        .bind(collection_id)
        .execute(&self.pool)
        .await?;

        let removed = result.rows_affected();
        tracing::info!(collection_id, removed, "removed collection from upload schedule");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::{NewAsset, NewCollection};
    use crate::storage::{queries, Database};
    use crate::upload::jobs::{next_due_job, update_upload_status, UploadUpdate};
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, h, m, s).unwrap()
    }

    async fn collection_with(downloaded: &[i64], missing: &[i64]) -> (Database, ScheduleBuilder, i64) {
        let db = Database::new_in_memory().await.unwrap();
        let collection_id = queries::upsert_collection(
            db.pool(),
            &NewCollection::new("S-1", "Series One").with_description("intro"),
        )
        .await
        .unwrap();

        for index in downloaded.iter().chain(missing.iter()) {
            let asset_id = queries::upsert_asset(db.pool(), collection_id, &NewAsset::new(format!("V-{}", index), *index))
                .await
                .unwrap();
            if downloaded.contains(index) {
                queries::set_asset_path(db.pool(), asset_id, &format!("/video/S/episode_{}.mp4", index))
                    .await
                    .unwrap();
            }
        }

        let builder = ScheduleBuilder::new(db.pool().clone());
        (db, builder, collection_id)
    }

    #[test]
    fn test_first_slot_alignment() {
        assert_eq!(first_slot(at(10, 15, 0)).unwrap(), at(11, 0, 0));
        assert_eq!(first_slot(at(10, 0, 0)).unwrap(), at(10, 0, 0));
        assert_eq!(first_slot(at(10, 0, 30)).unwrap(), at(10, 0, 0));
        assert_eq!(first_slot(at(23, 59, 59)).unwrap(), Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_build_assigns_hourly_slots_in_order() {
        let (_db, builder, collection_id) = collection_with(&[3, 1, 2], &[]).await;

        let receipt = builder.build_schedule_at(collection_id, at(10, 15, 0)).await.unwrap();
        assert_eq!(receipt.scheduled, 3);
        assert_eq!(receipt.first_slot, at(11, 0, 0));

        let schedule = builder.list_schedule(Some(collection_id)).await.unwrap();
        let slots: Vec<(i64, DateTime<Utc>)> = schedule
            .items
            .iter()
            .map(|i| (i.asset_index, i.job.scheduled_at))
            .collect();
        assert_eq!(slots, vec![(1, at(11, 0, 0)), (2, at(12, 0, 0)), (3, at(13, 0, 0))]);
        assert_eq!(schedule.pending, 3);
        assert_eq!(schedule.by_collection.len(), 1);
        assert_eq!(schedule.items[0].remote_title(), "Series One - Episode 1");
    }

    #[tokio::test]
    async fn test_build_is_idempotent() {
        let (_db, builder, collection_id) = collection_with(&[1, 2], &[]).await;

        builder.build_schedule_at(collection_id, at(10, 15, 0)).await.unwrap();
        let again = builder.build_schedule_at(collection_id, at(12, 30, 0)).await.unwrap();

        assert_eq!(again.scheduled, 0);
        assert_eq!(again.already_scheduled, 2);
        assert_eq!(builder.list_schedule(None).await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn test_preconditions_write_nothing() {
        let (_db, builder, collection_id) = collection_with(&[1, 2], &[3]).await;
        let err = builder.build_schedule_at(collection_id, at(9, 0, 0)).await.unwrap_err();
        assert!(matches!(err, RelayError::IncompleteDownloads { downloaded: 2, total: 3 }));
        assert!(err.to_string().contains("2/3"));
        assert_eq!(builder.list_schedule(None).await.unwrap().total, 0);

        let (_db, builder, collection_id) = collection_with(&[], &[1]).await;
        let err = builder.build_schedule_at(collection_id, at(9, 0, 0)).await.unwrap_err();
        assert!(matches!(err, RelayError::NoDownloadedAssets));

        let err = builder.build_schedule_at(999, at(9, 0, 0)).await.unwrap_err();
        assert!(matches!(err, RelayError::CollectionNotFound(999)));
    }

    #[tokio::test]
    async fn test_remove_keeps_history() {
        let (db, builder, collection_id) = collection_with(&[1, 2, 3], &[]).await;
        builder.build_schedule_at(collection_id, at(10, 0, 0)).await.unwrap();

        let items = builder.list_schedule(Some(collection_id)).await.unwrap().items;
        update_upload_status(db.pool(), items[0].job.id, UploadStatus::Completed, UploadUpdate::new().progress(100))
            .await
            .unwrap();
        update_upload_status(db.pool(), items[1].job.id, UploadStatus::Failed, UploadUpdate::new().error("x"))
            .await
            .unwrap();

        assert_eq!(builder.remove_from_schedule(collection_id).await.unwrap(), 2);

        let left = builder.list_schedule(Some(collection_id)).await.unwrap();
        assert_eq!(left.total, 1);
        assert_eq!(left.completed, 1);
    }

    #[tokio::test]
    async fn test_next_due_job_eligibility() {
        let (db, builder, collection_id) = collection_with(&[1, 2], &[]).await;
        builder.build_schedule_at(collection_id, at(10, 0, 0)).await.unwrap();

        // Nothing is due before the first slot
        assert!(next_due_job(db.pool(), at(9, 59, 0)).await.unwrap().is_none());

        let first = next_due_job(db.pool(), at(10, 0, 0)).await.unwrap().unwrap();
        assert_eq!(first.asset_index, 1);

        update_upload_status(
            db.pool(),
            first.job.id,
            UploadStatus::Failed,
            UploadUpdate::new().error("x").retry_count(3),
        )
        .await
        .unwrap();

        // Exhausted jobs are never selected; the next one becomes due later
        assert!(next_due_job(db.pool(), at(10, 30, 0)).await.unwrap().is_none());
        let second = next_due_job(db.pool(), at(11, 0, 0)).await.unwrap().unwrap();
        assert_eq!(second.asset_index, 2);
    }
}
