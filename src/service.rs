//! Relay service
//!
//! The single entry point a request layer (CLI, HTTP, UI bridge) talks to.
//! It wires the store, the collaborators and the broadcaster together:
//! - mutating operations return an [`Outcome`] and emit the matching event
//! - reads return the structured queue and schedule snapshots
//! - precondition failures come back as `Err` with a user-facing message
//!
//! Collaborators are optional so a read-only front end can run without
//! network configuration; an operation whose collaborator is missing fails
//! with a configuration error.

use crate::api::catalog::CatalogClient;
use crate::api::hosting::HostingClient;
use crate::api::StreamResolver;
use crate::config::RelayConfig;
use crate::download::{BatchDownloader, DownloadQueue, MediaSource, QueueStatus};
use crate::error::{RelayError, Result};
use crate::events::broadcaster::Frame;
use crate::events::{Broadcaster, EventSink, ProgressEvent};
use crate::storage::models::NewAsset;
use crate::storage::{queries, Database};
use crate::upload::{
    ScheduleBuilder, SchedulerStatus, TestUpload, UploadPublisher, UploadSchedule, UploadScheduler,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Result of a mutating operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
    pub count: u64,
}

impl Outcome {
    pub fn ok(message: impl Into<String>, count: u64) -> Self {
        Self {
            success: true,
            message: message.into(),
            count,
        }
    }
}

/// Result of a catalog ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub collection_id: i64,
    pub external_id: String,
    pub title: String,
    pub asset_count: usize,
}

/// Relay service façade
pub struct RelayService {
    db: Database,
    config: RelayConfig,
    broadcaster: Arc<Broadcaster>,
    queue: DownloadQueue,
    schedule: ScheduleBuilder,
    catalog: Option<Arc<dyn CatalogClient>>,
    downloader: Option<BatchDownloader>,
    publisher: Option<UploadPublisher>,
    scheduler: Option<UploadScheduler>,
}

impl RelayService {
    /// Service over an opened database, without collaborators
    pub fn new(db: Database, config: RelayConfig) -> Self {
        let pool = db.pool().clone();
        Self {
            queue: DownloadQueue::new(pool.clone()),
            schedule: ScheduleBuilder::new(pool),
            broadcaster: Arc::new(Broadcaster::new()),
            catalog: None,
            downloader: None,
            publisher: None,
            scheduler: None,
            db,
            config,
        }
    }

    /// Enable catalog ingestion
    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogClient>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Enable collection downloads
    pub fn with_downloads(mut self, resolver: Arc<dyn StreamResolver>, source: Arc<dyn MediaSource>) -> Self {
        self.downloader = Some(BatchDownloader::new(
            self.db.pool().clone(),
            resolver,
            source,
            &self.config,
        ));
        self
    }

    /// Enable uploads and the upload scheduler
    pub fn with_hosting(mut self, hosting: Arc<dyn HostingClient>) -> Self {
        let publisher = UploadPublisher::new(
            self.db.pool().clone(),
            hosting,
            self.config.upload_write_interval,
        );
        self.scheduler = Some(UploadScheduler::new(
            self.db.pool().clone(),
            publisher.clone(),
            self.config.scheduler_interval,
        ));
        self.publisher = Some(publisher);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn broadcaster(&self) -> Arc<Broadcaster> {
        Arc::clone(&self.broadcaster)
    }

    /// Register an event observer
    pub fn subscribe(&self) -> mpsc::Receiver<Frame> {
        self.broadcaster.subscribe()
    }

    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    /// Fetch a collection from the catalog and store it with its assets
    pub async fn ingest_collection(&self, external_id: &str) -> Result<IngestReport> {
        let catalog = self
            .catalog
            .as_ref()
            .ok_or_else(|| RelayError::InvalidConfiguration("catalog endpoint is not configured".to_string()))?;

        let detail = catalog.fetch_collection_detail(external_id).await?;
        let collection_id = queries::upsert_collection(self.db.pool(), &detail.to_new_collection()).await?;

        for asset in &detail.assets {
            queries::upsert_asset(self.db.pool(), collection_id, &NewAsset::from(asset)).await?;
        }

        tracing::info!(collection_id, external_id, assets = detail.assets.len(), "collection ingested");

        Ok(IngestReport {
            collection_id,
            external_id: external_id.to_string(),
            title: detail.title,
            asset_count: detail.assets.len(),
        })
    }

    // ------------------------------------------------------------------
    // Downloads
    // ------------------------------------------------------------------

    /// Download every missing asset of a collection
    ///
    /// `concurrency` falls back to the configured default.
    pub async fn download_collection(&self, collection_id: i64, concurrency: Option<usize>) -> Result<Outcome> {
        let downloader = self
            .downloader
            .as_ref()
            .ok_or_else(|| RelayError::InvalidConfiguration("stream endpoint is not configured".to_string()))?;

        let pending = queries::assets_to_download(self.db.pool(), collection_id).await?.len();
        let concurrency = concurrency.unwrap_or(self.config.download_concurrency);

        let paths = downloader
            .download_collection(collection_id, concurrency, &*self.broadcaster)
            .await?;

        let message = if pending == 0 {
            "All episodes already downloaded".to_string()
        } else {
            format!("Downloaded {} of {} episodes", paths.len(), pending)
        };
        Ok(Outcome {
            success: paths.len() == pending,
            message,
            count: paths.len() as u64,
        })
    }

    pub async fn queue_status(&self, collection_id: Option<i64>) -> Result<QueueStatus> {
        self.queue.queue_status(collection_id).await
    }

    /// Remove finished download jobs
    pub async fn clear_queue(&self, collection_id: Option<i64>) -> Result<Outcome> {
        let count = self.queue.clear(collection_id).await?;
        self.broadcaster.emit(ProgressEvent::QueueCleared { collection_id, count });
        Ok(Outcome::ok(format!("Cleared {} finished downloads", count), count))
    }

    /// Requeue failed download jobs
    pub async fn retry_failed(&self, collection_id: Option<i64>) -> Result<Outcome> {
        let count = self.queue.retry_failed(collection_id).await?;
        self.broadcaster.emit(ProgressEvent::QueueRetry { collection_id, count });
        Ok(Outcome::ok(format!("Reset {} failed downloads to pending", count), count))
    }

    // ------------------------------------------------------------------
    // Upload schedule
    // ------------------------------------------------------------------

    /// Put a fully downloaded collection on the hourly timetable
    pub async fn schedule_collection(&self, collection_id: i64) -> Result<Outcome> {
        let receipt = self.schedule.build_schedule(collection_id).await?;

        self.broadcaster.emit(ProgressEvent::UploadScheduled {
            collection_id,
            collection_title: receipt.collection_title.clone(),
            count: receipt.scheduled,
        });

        let message = if receipt.scheduled == 0 {
            format!("All episodes of {} are already scheduled", receipt.collection_title)
        } else {
            format!(
                "Scheduled {} episodes of {} starting at {}",
                receipt.scheduled,
                receipt.collection_title,
                receipt.first_slot.format("%Y-%m-%d %H:%M UTC")
            )
        };
        Ok(Outcome::ok(message, receipt.scheduled))
    }

    pub async fn upload_schedule(&self, collection_id: Option<i64>) -> Result<UploadSchedule> {
        self.schedule.list_schedule(collection_id).await
    }

    /// Drop the pending and failed timetable rows of a collection
    pub async fn remove_schedule(&self, collection_id: i64) -> Result<Outcome> {
        let count = self.schedule.remove_from_schedule(collection_id).await?;
        self.broadcaster
            .emit(ProgressEvent::UploadScheduleRemoved { collection_id, count });
        Ok(Outcome::ok(format!("Removed {} scheduled uploads", count), count))
    }

    // ------------------------------------------------------------------
    // Scheduler
    // ------------------------------------------------------------------

    /// Start the upload timer; false when it was already running
    pub fn start_scheduler(&self) -> Result<bool> {
        let scheduler = self.scheduler.as_ref().ok_or_else(hosting_missing)?;
        let sink: Arc<dyn EventSink> = self.broadcaster.clone();
        Ok(scheduler.start(sink))
    }

    pub fn stop_scheduler(&self) -> bool {
        self.scheduler.as_ref().map_or(false, UploadScheduler::stop)
    }

    pub fn scheduler_status(&self) -> SchedulerStatus {
        match &self.scheduler {
            Some(scheduler) => scheduler.status(),
            None => SchedulerStatus {
                is_running: false,
                is_uploading: false,
                current_upload: None,
            },
        }
    }

    /// Upload one downloaded asset right away, outside the timetable
    pub async fn test_upload(&self, asset_id: i64) -> Result<TestUpload> {
        let publisher = self.publisher.as_ref().ok_or_else(hosting_missing)?;
        publisher.publish_asset(asset_id, &*self.broadcaster).await
    }
}

fn hosting_missing() -> RelayError {
    RelayError::MissingCredentials("hosting client is not configured".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::NewCollection;

    #[tokio::test]
    async fn test_queue_operations_emit_events() {
        let db = Database::new_in_memory().await.unwrap();
        let service = RelayService::new(db, RelayConfig::default());
        let mut rx = service.subscribe();

        let outcome = service.retry_failed(None).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.count, 0);

        let greeting = rx.recv().await.unwrap();
        assert!(greeting.contains("connected"));
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("\"type\":\"queue_retry\""));
    }

    #[tokio::test]
    async fn test_missing_collaborators_are_reported() {
        let db = Database::new_in_memory().await.unwrap();
        let collection_id = queries::upsert_collection(db.pool(), &NewCollection::new("S-1", "One"))
            .await
            .unwrap();
        let service = RelayService::new(db, RelayConfig::default());

        let err = service.download_collection(collection_id, None).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidConfiguration(_)));

        let err = service.start_scheduler().unwrap_err();
        assert!(matches!(err, RelayError::MissingCredentials(_)));
        assert!(!service.scheduler_status().is_running);

        let err = service.ingest_collection("S-2").await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn test_schedule_precondition_surfaces_message() {
        let db = Database::new_in_memory().await.unwrap();
        let collection_id = queries::upsert_collection(db.pool(), &NewCollection::new("S-1", "One"))
            .await
            .unwrap();
        queries::upsert_asset(db.pool(), collection_id, &NewAsset::new("V-1", 1))
            .await
            .unwrap();
        let service = RelayService::new(db, RelayConfig::default());

        let err = service.schedule_collection(collection_id).await.unwrap_err();
        assert!(err.is_precondition());
        assert_eq!(err.user_message(), "No downloaded episodes found for this series");
    }
}
