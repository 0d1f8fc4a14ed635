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


//! Download management and streaming
//!
//! This module mirrors catalog assets to local disk.
//!
//! - `queue`: persistent per-asset job state
//! - `batch`: the bounded-concurrency collection downloader
//! - `stream`: byte sources with range resume
//! - `progress`: byte counters and store write throttling

pub mod batch;
pub mod progress;
pub mod queue;
pub mod stream;

// Re-export commonly used types
pub use batch::BatchDownloader;
pub use queue::{DownloadJob, DownloadJobView, DownloadQueue, DownloadStatus, QueueStatus, StatusUpdate};
pub use stream::{HttpMediaSource, MediaSource, MediaStream};
