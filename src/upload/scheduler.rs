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


//! Upload scheduler
//!
//! A periodic timer that publishes the earliest due job. Each tick runs in
//! its own task so a long upload never delays the timer, and at most one
//! upload is in flight: a tick that finds the single upload slot taken
//! returns immediately. The slot is claimed before any I/O, so two ticks can
//! never both select the same job.
//!
//! Stopping cancels the timer only; an upload already in flight runs to
//! completion and records its outcome.

use super::jobs::{next_due_job, UploadJobView};
use super::publisher::{UploadAttempt, UploadPublisher};
use crate::error::Result;
use crate::events::{EventSink, NullSink};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// The upload currently in flight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub job_id: i64,
    pub collection_id: i64,
    pub asset_id: i64,
    pub collection_title: String,
    pub asset_index: i64,
    pub started_at: DateTime<Utc>,
}

impl UploadSummary {
    fn from_job(job: &UploadJobView) -> Self {
        Self {
            job_id: job.job.id,
            collection_id: job.job.collection_id,
            asset_id: job.job.asset_id,
            collection_title: job.collection_title.clone(),
            asset_index: job.asset_index,
            started_at: Utc::now(),
        }
    }
}

/// Scheduler state for observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub is_uploading: bool,
    pub current_upload: Option<UploadSummary>,
}

struct Timer {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct SchedulerInner {
    pool: SqlitePool,
    publisher: UploadPublisher,
    interval: Duration,
    upload_slot: Arc<Semaphore>,
    current_upload: Mutex<Option<UploadSummary>>,
    sink: Mutex<Arc<dyn EventSink>>,
    timer: Mutex<Option<Timer>>,
}

/// Clears the in-flight summary when the attempt ends, however it ends
struct CurrentUploadGuard<'a> {
    slot: &'a Mutex<Option<UploadSummary>>,
}

impl<'a> CurrentUploadGuard<'a> {
    fn set(slot: &'a Mutex<Option<UploadSummary>>, summary: UploadSummary) -> Self {
        *lock(slot) = Some(summary);
        Self { slot }
    }
}

impl Drop for CurrentUploadGuard<'_> {
    fn drop(&mut self) {
        *lock(self.slot) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Periodic upload scheduler
#[derive(Clone)]
pub struct UploadScheduler {
    inner: Arc<SchedulerInner>,
}

impl UploadScheduler {
    pub fn new(pool: SqlitePool, publisher: UploadPublisher, interval: Duration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                pool,
                publisher,
                interval,
                upload_slot: Arc::new(Semaphore::new(1)),
                current_upload: Mutex::new(None),
                sink: Mutex::new(Arc::new(NullSink)),
                timer: Mutex::new(None),
            }),
        }
    }

    /// Start the timer, reporting to `sink`
    ///
    /// The first check runs immediately. Returns false when already running.
    pub fn start(&self, sink: Arc<dyn EventSink>) -> bool {
        let mut timer = lock(&self.inner.timer);
        if timer.is_some() {
            tracing::info!("upload scheduler already running");
            return false;
        }

        *lock(&self.inner.sink) = sink;

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        let period = self.inner.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        let scheduler = UploadScheduler { inner };
                        tokio::spawn(async move { scheduler.run_tick().await });
                    }
                }
            }
            tracing::debug!("upload scheduler timer stopped");
        });

        *timer = Some(Timer { stop_tx, handle });
        tracing::info!(interval_secs = period.as_secs(), "upload scheduler started");
        true
    }

    /// Stop the timer; an in-flight upload is left to finish
    ///
    /// Returns false when not running.
    pub fn stop(&self) -> bool {
        match lock(&self.inner.timer).take() {
            Some(timer) => {
                let _ = timer.stop_tx.send(());
                drop(timer.handle);
                tracing::info!("upload scheduler stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.timer).is_some()
    }

    pub fn status(&self) -> SchedulerStatus {
        let current_upload = lock(&self.inner.current_upload).clone();
        SchedulerStatus {
            is_running: self.is_running(),
            is_uploading: current_upload.is_some(),
            current_upload,
        }
    }

    async fn run_tick(&self) {
        if let Err(e) = self.check_and_upload().await {
            tracing::error!(error = %e, "upload check failed");
        }
    }

    /// Publish the earliest due job, if any and if no upload is in flight
    ///
    /// Returns `None` when the slot was busy or nothing was due.
    pub async fn check_and_upload(&self) -> Result<Option<UploadAttempt>> {
        let _permit = match Arc::clone(&self.inner.upload_slot).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::info!("upload in progress, skipping check");
                return Ok(None);
            }
        };

        let job = match next_due_job(&self.inner.pool, Utc::now()).await? {
            Some(job) => job,
            None => {
                tracing::debug!("no upload due");
                return Ok(None);
            }
        };

        let _current = CurrentUploadGuard::set(&self.inner.current_upload, UploadSummary::from_job(&job));
        let sink = Arc::clone(&*lock(&self.inner.sink));

        let attempt = self.inner.publisher.run_job(&job, sink.as_ref()).await?;
        Ok(Some(attempt))
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.timer).take() {
            let _ = timer.stop_tx.send(());
        }
    }
}
