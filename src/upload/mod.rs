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


//! Scheduled republishing
//!
//! - `jobs`: upload schedule rows, status transitions and the retry policy
//! - `schedule`: the hourly timetable builder, listing and removal
//! - `publisher`: one upload attempt against the hosting platform
//! - `scheduler`: the periodic timer with its single upload slot

pub mod jobs;
pub mod publisher;
pub mod schedule;
pub mod scheduler;

// Re-export commonly used types
pub use jobs::{next_due_job, UploadJob, UploadJobView, UploadStatus, UploadUpdate, MAX_UPLOAD_ATTEMPTS};
pub use publisher::{TestUpload, UploadAttempt, UploadPublisher};
pub use schedule::{first_slot, CollectionSchedule, ScheduleBuilder, ScheduleReceipt, UploadSchedule};
pub use scheduler::{SchedulerStatus, UploadScheduler, UploadSummary};
