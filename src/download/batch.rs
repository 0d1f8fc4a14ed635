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


//! Batch downloader
//!
//! Fetches every not-yet-downloaded asset of a collection:
//! - assets are processed in position order, in batches of `concurrency`
//! - assets of one batch run concurrently, batches run one after another
//!   with a fixed pause in between
//! - a failing asset is marked `failed` and never aborts the rest
//!
//! Per asset: mark `downloading`, resolve the stream URL, skip the transfer
//! when the destination already exists, otherwise stream into a `.part`
//! file (resuming a leftover one) and rename it into place. The local path
//! is recorded on the asset and the job ends `completed`.

use crate::api::StreamResolver;
use crate::config::RelayConfig;
use crate::download::progress::{bytes_string, TransferProgress, WriteThrottle};
use crate::download::queue::{DownloadQueue, DownloadStatus, StatusUpdate};
use crate::download::stream::{MediaSource, MediaStream};
use crate::error::{RelayError, Result};
use crate::events::{EventSink, ProgressEvent};
use crate::file::paths::{asset_file_path, partial_path};
use crate::storage::models::{Asset, Collection};
use crate::storage::queries;
use futures_util::future::join_all;
use futures_util::StreamExt;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Batch downloader
#[derive(Clone)]
pub struct BatchDownloader {
    pool: SqlitePool,
    queue: DownloadQueue,
    resolver: Arc<dyn StreamResolver>,
    source: Arc<dyn MediaSource>,
    video_dir: PathBuf,
    batch_delay: Duration,
    write_interval: Duration,
    transfer_timeout: Duration,
}

impl BatchDownloader {
    pub fn new(
        pool: SqlitePool,
        resolver: Arc<dyn StreamResolver>,
        source: Arc<dyn MediaSource>,
        config: &RelayConfig,
    ) -> Self {
        Self {
            queue: DownloadQueue::new(pool.clone()),
            pool,
            resolver,
            source,
            video_dir: config.video_dir.clone(),
            batch_delay: config.batch_delay,
            write_interval: config.download_write_interval,
            transfer_timeout: config.transfer_timeout,
        }
    }

    pub fn queue(&self) -> &DownloadQueue {
        &self.queue
    }

    /// Download every asset of a collection that has no local file
    ///
    /// Returns the local paths of the assets that ended `completed`. A
    /// `concurrency` of 0 is treated as 1.
    pub async fn download_collection(
        &self,
        collection_id: i64,
        concurrency: usize,
        sink: &dyn EventSink,
    ) -> Result<Vec<String>> {
        let collection = queries::find_collection(&self.pool, collection_id)
            .await?
            .ok_or(RelayError::CollectionNotFound(collection_id))?;

        let assets = queries::assets_to_download(&self.pool, collection_id).await?;
        if assets.is_empty() {
            tracing::info!(collection_id, "nothing to download");
            sink.emit(ProgressEvent::DownloadComplete {
                collection_id,
                count: 0,
                failed: 0,
            });
            return Ok(Vec::new());
        }

        self.queue.enqueue(collection_id, &assets).await?;

        let concurrency = concurrency.max(1);
        let batch_count = (assets.len() + concurrency - 1) / concurrency;
        tracing::info!(
            collection_id,
            assets = assets.len(),
            concurrency,
            batches = batch_count,
            "starting collection download"
        );

        let mut paths = Vec::with_capacity(assets.len());
        for (batch_index, batch) in assets.chunks(concurrency).enumerate() {
            let results = join_all(
                batch
                    .iter()
                    .map(|asset| self.download_asset(&collection, asset, sink)),
            )
            .await;
            paths.extend(results.into_iter().flatten());

            if batch_index + 1 < batch_count && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
        }

        let failed = assets.len() - paths.len();
        tracing::info!(collection_id, completed = paths.len(), failed, "collection download finished");
        sink.emit(ProgressEvent::DownloadComplete {
            collection_id,
            count: paths.len(),
            failed,
        });

        Ok(paths)
    }

    /// Run one asset, recording a failure instead of returning it
    async fn download_asset(
        &self,
        collection: &Collection,
        asset: &Asset,
        sink: &dyn EventSink,
    ) -> Option<String> {
        match self.fetch_asset(collection, asset, sink).await {
            Ok(path) => Some(path),
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(asset_id = asset.id, index = asset.index_sequence, error = %message, "asset download failed");

                if let Err(store_err) = self
                    .queue
                    .update_status(asset.id, DownloadStatus::Failed, StatusUpdate::new().error(message.clone()))
                    .await
                {
                    tracing::error!(asset_id = asset.id, error = %store_err, "failed to record download failure");
                }

                sink.emit(ProgressEvent::DownloadProgress {
                    collection_id: collection.id,
                    asset_id: asset.id,
                    asset_index: asset.index_sequence,
                    status: DownloadStatus::Failed,
                    downloaded_bytes: 0,
                    total_bytes: 0,
                    progress: 0.0,
                    path: None,
                    error: Some(message),
                });
                None
            }
        }
    }

    async fn fetch_asset(
        &self,
        collection: &Collection,
        asset: &Asset,
        sink: &dyn EventSink,
    ) -> Result<String> {
        self.queue
            .update_status(asset.id, DownloadStatus::Downloading, StatusUpdate::new().progress(0.0))
            .await?;

        let url = self
            .resolver
            .resolve_stream_url(&asset.external_id)
            .await?
            .ok_or_else(|| RelayError::StreamUrlNotFound(asset.external_id.clone()))?;

        let destination = asset_file_path(
            &self.video_dir,
            collection.id,
            &collection.title,
            asset.index_sequence,
        );

        let size = if fs::try_exists(&destination).await? {
            tracing::info!(asset_id = asset.id, path = %destination.display(), "file already present, skipping transfer");
            fs::metadata(&destination).await?.len()
        } else {
            self.transfer(collection, asset, &url, &destination, sink).await?
        };

        let path = destination.to_string_lossy().into_owned();
        queries::set_asset_path(&self.pool, asset.id, &path).await?;
        self.queue
            .update_status(
                asset.id,
                DownloadStatus::Completed,
                StatusUpdate::new().progress(100.0).bytes(size, size),
            )
            .await?;

        sink.emit(ProgressEvent::DownloadProgress {
            collection_id: collection.id,
            asset_id: asset.id,
            asset_index: asset.index_sequence,
            status: DownloadStatus::Completed,
            downloaded_bytes: size,
            total_bytes: size,
            progress: 100.0,
            path: Some(path.clone()),
            error: None,
        });

        Ok(path)
    }

    /// Stream `url` into `destination`, returning the final size
    async fn transfer(
        &self,
        collection: &Collection,
        asset: &Asset,
        url: &str,
        destination: &Path,
        sink: &dyn EventSink,
    ) -> Result<u64> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }

        let partial = partial_path(destination);
        let leftover = match fs::metadata(&partial).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let stream = match self.source.open(url, leftover).await {
            Err(RelayError::UnexpectedStatusCode { status_code: 416, .. }) if leftover > 0 => {
                tracing::warn!(asset_id = asset.id, "stale partial file, restarting transfer");
                self.source.open(url, 0).await?
            }
            result => result?,
        };

        let MediaStream {
            content_length,
            resumed,
            mut chunks,
        } = stream;

        let start = if resumed { leftover } else { 0 };
        if leftover > 0 {
            tracing::info!(asset_id = asset.id, offset = start, resumed, "found partial file");
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(resumed)
            .truncate(!resumed)
            .open(&partial)
            .await?;

        let total = content_length.map(|len| start + len).unwrap_or(0);
        let mut progress = TransferProgress::new(start, total);
        let mut throttle = WriteThrottle::starting_now(self.write_interval);

        loop {
            let next = tokio::time::timeout(self.transfer_timeout, chunks.next())
                .await
                .map_err(|_| RelayError::Timeout(self.transfer_timeout.as_secs()))?;
            let chunk = match next {
                Some(chunk) => chunk?,
                None => break,
            };

            file.write_all(&chunk).await?;
            progress.advance(chunk.len());

            sink.emit(ProgressEvent::DownloadProgress {
                collection_id: collection.id,
                asset_id: asset.id,
                asset_index: asset.index_sequence,
                status: DownloadStatus::Downloading,
                downloaded_bytes: progress.downloaded_bytes,
                total_bytes: progress.total_bytes,
                progress: progress.percentage(),
                path: None,
                error: None,
            });

            if throttle.ready() {
                self.queue
                    .update_status(
                        asset.id,
                        DownloadStatus::Downloading,
                        StatusUpdate::new()
                            .progress(progress.percentage())
                            .bytes(progress.downloaded_bytes, progress.total_bytes)
                            .skip_start_time(),
                    )
                    .await?;
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if total > 0 && progress.downloaded_bytes < total {
            return Err(RelayError::network_error(
                format!(
                    "Stream ended early: {} of {} bytes",
                    progress.downloaded_bytes, total
                ),
                true,
            ));
        }

        fs::rename(&partial, destination).await?;
        tracing::debug!(asset_id = asset.id, size = %bytes_string(progress.downloaded_bytes), "transfer finished");
        Ok(progress.downloaded_bytes)
    }
}
