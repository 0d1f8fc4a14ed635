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


//! Progress and lifecycle events
//!
//! The downloader and the upload scheduler report through an [`EventSink`]
//! handed to them by the caller. [`Broadcaster`] is the sink that fans events
//! out to every connected observer.
//!
//! Events serialize as `{"type": "<snake_case>", "data": {...camelCase...}}`.

pub mod broadcaster;

pub use broadcaster::Broadcaster;

use crate::download::queue::DownloadStatus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Event pushed to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Greeting sent to a freshly subscribed observer
    Connected { message: String },

    /// Per-asset transfer progress; also carries the terminal
    /// `completed`/`failed` transition of each asset
    #[serde(rename_all = "camelCase")]
    DownloadProgress {
        collection_id: i64,
        asset_id: i64,
        asset_index: i64,
        status: DownloadStatus,
        downloaded_bytes: u64,
        total_bytes: u64,
        progress: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A batch download call finished
    #[serde(rename_all = "camelCase")]
    DownloadComplete {
        collection_id: i64,
        count: usize,
        failed: usize,
    },

    #[serde(rename_all = "camelCase")]
    UploadProgress {
        collection_id: i64,
        asset_id: i64,
        collection_title: String,
        asset_index: i64,
        progress: u8,
    },

    #[serde(rename_all = "camelCase")]
    UploadComplete {
        collection_id: i64,
        asset_id: i64,
        collection_title: String,
        asset_index: i64,
        remote_video_id: String,
    },

    /// Upload attempt failed; `skipped` is set once the job is terminal
    #[serde(rename_all = "camelCase")]
    UploadError {
        collection_id: i64,
        asset_id: i64,
        collection_title: String,
        asset_index: i64,
        error: String,
        retry_count: i64,
        skipped: bool,
    },

    #[serde(rename_all = "camelCase")]
    QueueCleared {
        collection_id: Option<i64>,
        count: u64,
    },

    #[serde(rename_all = "camelCase")]
    QueueRetry {
        collection_id: Option<i64>,
        count: u64,
    },

    #[serde(rename_all = "camelCase")]
    UploadScheduled {
        collection_id: i64,
        collection_title: String,
        count: u64,
    },

    #[serde(rename_all = "camelCase")]
    UploadScheduleRemoved {
        collection_id: i64,
        count: u64,
    },
}

impl ProgressEvent {
    /// Wire name of the event
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Connected { .. } => "connected",
            ProgressEvent::DownloadProgress { .. } => "download_progress",
            ProgressEvent::DownloadComplete { .. } => "download_complete",
            ProgressEvent::UploadProgress { .. } => "upload_progress",
            ProgressEvent::UploadComplete { .. } => "upload_complete",
            ProgressEvent::UploadError { .. } => "upload_error",
            ProgressEvent::QueueCleared { .. } => "queue_cleared",
            ProgressEvent::QueueRetry { .. } => "queue_retry",
            ProgressEvent::UploadScheduled { .. } => "upload_scheduled",
            ProgressEvent::UploadScheduleRemoved { .. } => "upload_schedule_removed",
        }
    }
}

/// Destination for progress events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn emit(&self, event: ProgressEvent) {
        (**self).emit(event)
    }
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Adapter turning a closure into a sink
pub struct FnSink<F>(pub F);

impl<F> EventSink for FnSink<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        (self.0)(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_wire_format() {
        let event = ProgressEvent::UploadScheduleRemoved {
            collection_id: 7,
            count: 2,
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "upload_schedule_removed");
        assert_eq!(json["data"]["collectionId"], 7);
        assert_eq!(json["data"]["count"], 2);
        assert_eq!(event.kind(), "upload_schedule_removed");
    }

    #[test]
    fn test_download_progress_omits_empty_fields() {
        let event = ProgressEvent::DownloadProgress {
            collection_id: 1,
            asset_id: 2,
            asset_index: 3,
            status: DownloadStatus::Downloading,
            downloaded_bytes: 50,
            total_bytes: 100,
            progress: 50.0,
            path: None,
            error: None,
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["data"]["status"], "downloading");
        assert_eq!(json["data"]["downloadedBytes"], 50);
        assert!(json["data"].get("error").is_none());
    }

    #[test]
    fn test_fn_sink_forwards() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let sink = FnSink(move |event: ProgressEvent| {
            captured.lock().unwrap().push(event.kind());
        });

        sink.emit(ProgressEvent::QueueRetry {
            collection_id: None,
            count: 0,
        });

        assert_eq!(*seen.lock().unwrap(), vec!["queue_retry"]);
    }
}
