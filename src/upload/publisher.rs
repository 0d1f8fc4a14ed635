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


//! Single upload attempt
//!
//! Drives one schedule job through the hosting client and applies the
//! outcome to the store:
//! - success: `completed`, progress 100, remote id recorded
//! - failure: `failed` with an incremented `retry_count`, or `skipped` once
//!   the count reaches the attempt limit
//!
//! Observers see every progress update; the store sees one at most every
//! `upload_write_interval`.
//!
//! If recording the outcome fails, the job is moved to `failed` on a best
//! effort basis so it never stays `uploading`.

use super::jobs::{record_failure, update_upload_status, UploadJobView, UploadStatus, UploadUpdate};
use crate::api::hosting::{public_video_url, HostingClient};
use crate::download::progress::WriteThrottle;
use crate::error::{RelayError, Result};
use crate::events::{EventSink, ProgressEvent};
use crate::storage::queries;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Outcome of one attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum UploadAttempt {
    #[serde(rename_all = "camelCase")]
    Completed { remote_video_id: String },
    #[serde(rename_all = "camelCase")]
    Failed { error: String, retry_count: i64 },
    #[serde(rename_all = "camelCase")]
    Skipped { error: String, retry_count: i64 },
}

/// Result of an out-of-timetable test upload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestUpload {
    pub asset_id: i64,
    pub title: String,
    pub remote_video_id: String,
    pub url: String,
}

/// Publishes downloaded assets to the hosting platform
#[derive(Clone)]
pub struct UploadPublisher {
    pool: SqlitePool,
    hosting: Arc<dyn HostingClient>,
    write_interval: Duration,
}

impl UploadPublisher {
    pub fn new(pool: SqlitePool, hosting: Arc<dyn HostingClient>, write_interval: Duration) -> Self {
        Self {
            pool,
            hosting,
            write_interval,
        }
    }

    /// Run one attempt of a schedule job
    ///
    /// Upload failures are recorded on the job and reported in the returned
    /// attempt; only store failures surface as `Err`.
    pub async fn run_job(&self, job: &UploadJobView, sink: &dyn EventSink) -> Result<UploadAttempt> {
        tracing::info!(
            job_id = job.job.id,
            collection_id = job.job.collection_id,
            index = job.asset_index,
            retry_count = job.job.retry_count,
            "starting upload"
        );

        match self.try_publish(job, sink).await {
            Ok(remote_video_id) => {
                let recorded = update_upload_status(
                    &self.pool,
                    job.job.id,
                    UploadStatus::Completed,
                    UploadUpdate::new().progress(100).remote_video_id(remote_video_id.clone()),
                )
                .await;
                if let Err(e) = recorded {
                    let cause = format!("Published as {} but the result was not stored: {}", remote_video_id, e);
                    self.release_job(job.job.id, Some(&remote_video_id), cause).await;
                    return Err(e);
                }

                sink.emit(ProgressEvent::UploadComplete {
                    collection_id: job.job.collection_id,
                    asset_id: job.job.asset_id,
                    collection_title: job.collection_title.clone(),
                    asset_index: job.asset_index,
                    remote_video_id: remote_video_id.clone(),
                });
                tracing::info!(job_id = job.job.id, %remote_video_id, "upload completed");

                Ok(UploadAttempt::Completed { remote_video_id })
            }
            Err(e) => {
                let error = e.to_string();
                let (status, retry_count) = match record_failure(&self.pool, job.job.id, &error).await {
                    Ok(outcome) => outcome,
                    Err(store_error) => {
                        self.release_job(job.job.id, None, error).await;
                        return Err(store_error);
                    }
                };
                let skipped = status == UploadStatus::Skipped;

                if skipped {
                    tracing::error!(job_id = job.job.id, retry_count, error = %error, "upload skipped after repeated failures");
                } else {
                    tracing::warn!(job_id = job.job.id, retry_count, error = %error, "upload failed");
                }

                sink.emit(ProgressEvent::UploadError {
                    collection_id: job.job.collection_id,
                    asset_id: job.job.asset_id,
                    collection_title: job.collection_title.clone(),
                    asset_index: job.asset_index,
                    error: error.clone(),
                    retry_count,
                    skipped,
                });

                Ok(if skipped {
                    UploadAttempt::Skipped { error, retry_count }
                } else {
                    UploadAttempt::Failed { error, retry_count }
                })
            }
        }
    }

    /// Move a job out of `uploading` after its outcome could not be stored
    async fn release_job(&self, job_id: i64, remote_video_id: Option<&str>, cause: String) {
        let mut update = UploadUpdate::new().error(cause);
        if let Some(id) = remote_video_id {
            update = update.remote_video_id(id);
        }

        match update_upload_status(&self.pool, job_id, UploadStatus::Failed, update).await {
            Ok(_) => tracing::warn!(job_id, "upload outcome not stored, job reset to failed"),
            Err(e) => tracing::error!(job_id, error = %e, "could not reset upload job, it stays uploading"),
        }
    }

    async fn try_publish(&self, job: &UploadJobView, sink: &dyn EventSink) -> Result<String> {
        let path = existing_media_path(job.video_path.as_deref()).await?;

        update_upload_status(&self.pool, job.job.id, UploadStatus::Uploading, UploadUpdate::new().progress(0)).await?;

        let pool = &self.pool;
        let job_id = job.job.id;
        let mut throttle = WriteThrottle::starting_now(self.write_interval);

        self.upload_with_progress(&path, &job.remote_title(), &job.collection_description, |percent| {
            sink.emit(ProgressEvent::UploadProgress {
                collection_id: job.job.collection_id,
                asset_id: job.job.asset_id,
                collection_title: job.collection_title.clone(),
                asset_index: job.asset_index,
                progress: percent,
            });

            let due = throttle.ready();
            async move {
                if due {
                    if let Err(e) = update_upload_status(
                        pool,
                        job_id,
                        UploadStatus::Uploading,
                        UploadUpdate::new().progress(percent as i64).skip_start_time(),
                    )
                    .await
                    {
                        tracing::warn!(job_id, error = %e, "failed to persist upload progress");
                    }
                }
            }
        })
        .await
    }

    /// Upload one downloaded asset outside the timetable
    ///
    /// The schedule is not touched. Title and description follow the
    /// timetable rules.
    pub async fn publish_asset(&self, asset_id: i64, sink: &dyn EventSink) -> Result<TestUpload> {
        let asset = queries::find_asset(&self.pool, asset_id)
            .await?
            .ok_or(RelayError::AssetNotFound(asset_id))?;
        let collection = queries::find_collection(&self.pool, asset.series_id)
            .await?
            .ok_or(RelayError::CollectionNotFound(asset.series_id))?;

        let path = existing_media_path(asset.path.as_deref()).await?;
        let title = format!("{} - Episode {}", collection.title, asset.index_sequence);

        tracing::info!(asset_id, title = %title, "starting test upload");

        let remote_video_id = self
            .upload_with_progress(&path, &title, &collection.description, |percent| {
                sink.emit(ProgressEvent::UploadProgress {
                    collection_id: collection.id,
                    asset_id,
                    collection_title: collection.title.clone(),
                    asset_index: asset.index_sequence,
                    progress: percent,
                });
                async {}
            })
            .await?;

        Ok(TestUpload {
            asset_id,
            title,
            url: public_video_url(&remote_video_id),
            remote_video_id,
        })
    }

    /// Run the hosting sequence, feeding each progress report to `on_progress`
    ///
    /// The hosting client reports synchronously; reports are forwarded over a
    /// channel so `on_progress` may await store writes.
    async fn upload_with_progress<F, Fut>(
        &self,
        path: &Path,
        title: &str,
        description: &str,
        mut on_progress: F,
    ) -> Result<String>
    where
        F: FnMut(u8) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<u8>();
        let report = move |percent: u8| {
            let _ = tx.send(percent);
        };

        let upload = self.hosting.upload_and_publish(path, title, description, &report);
        tokio::pin!(upload);

        let result = loop {
            tokio::select! {
                result = &mut upload => break result,
                Some(percent) = rx.recv() => on_progress(percent).await,
            }
        };

        while let Ok(percent) = rx.try_recv() {
            on_progress(percent).await;
        }

        result
    }
}

async fn existing_media_path(path: Option<&str>) -> Result<PathBuf> {
    let path = match path {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => return Err(RelayError::MediaFileNotFound("no local file recorded".to_string())),
    };

    if !tokio::fs::try_exists(&path).await? {
        return Err(RelayError::MediaFileNotFound(path.display().to_string()));
    }
    Ok(path)
}
