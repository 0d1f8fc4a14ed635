//! In-process collaborators for the pipeline tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::StreamExt;
use series_relay::api::hosting::{HostingClient, UploadDestination, UploadProgressFn};
use series_relay::api::StreamResolver;
use series_relay::download::{MediaSource, MediaStream};
use series_relay::error::{RelayError, Result};
use series_relay::storage::models::{NewAsset, NewCollection};
use series_relay::storage::{queries, Database};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

pub const PAYLOAD: &[u8] = b"chunk-achunk-b";

/// Resolves every asset except the listed ones
pub struct FakeResolver {
    missing: HashSet<String>,
}

impl FakeResolver {
    pub fn new(missing: &[&str]) -> Self {
        Self {
            missing: missing.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl StreamResolver for FakeResolver {
    async fn resolve_stream_url(&self, external_asset_id: &str) -> Result<Option<String>> {
        if self.missing.contains(external_asset_id) {
            Ok(None)
        } else {
            Ok(Some(format!("mem://{}", external_asset_id)))
        }
    }
}

/// Serves [`PAYLOAD`] in two chunks for any URL
pub struct FakeSource;

#[async_trait]
impl MediaSource for FakeSource {
    async fn open(&self, _url: &str, _resume_from: u64) -> Result<MediaStream> {
        Ok(MediaStream::from_chunks(vec![
            b"chunk-a".to_vec(),
            b"chunk-b".to_vec(),
        ]))
    }
}

/// Serves [`PAYLOAD`] and counts how often it was opened
#[derive(Default)]
pub struct CountingSource {
    opens: AtomicUsize,
}

impl CountingSource {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for CountingSource {
    async fn open(&self, url: &str, resume_from: u64) -> Result<MediaStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        FakeSource.open(url, resume_from).await
    }
}

/// Serves [`PAYLOAD`] from the requested offset and records every offset
///
/// A rejecting source answers any non-zero offset with `416`.
pub struct RangeSource {
    offsets: Mutex<Vec<u64>>,
    reject_ranges: bool,
}

impl RangeSource {
    pub fn honoring() -> Self {
        Self {
            offsets: Mutex::new(Vec::new()),
            reject_ranges: false,
        }
    }

    pub fn rejecting() -> Self {
        Self {
            reject_ranges: true,
            ..Self::honoring()
        }
    }

    pub fn offsets(&self) -> Vec<u64> {
        self.offsets.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaSource for RangeSource {
    async fn open(&self, url: &str, resume_from: u64) -> Result<MediaStream> {
        self.offsets.lock().unwrap().push(resume_from);

        if resume_from == 0 {
            return Ok(MediaStream::from_chunks(vec![PAYLOAD.to_vec()]));
        }
        if self.reject_ranges || resume_from as usize > PAYLOAD.len() {
            return Err(RelayError::UnexpectedStatusCode {
                status_code: 416,
                url: url.to_string(),
            });
        }

        let rest = PAYLOAD[resume_from as usize..].to_vec();
        Ok(MediaStream {
            content_length: Some(rest.len() as u64),
            resumed: true,
            chunks: futures_util::stream::iter(vec![Ok(rest)]).boxed(),
        })
    }
}

/// Streams whatever the test pushes through the sender, announcing
/// [`PAYLOAD`]'s length; the stream ends when the sender is dropped
pub struct ChannelSource {
    chunks: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl ChannelSource {
    pub fn new() -> (Self, mpsc::UnboundedSender<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                chunks: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

#[async_trait]
impl MediaSource for ChannelSource {
    async fn open(&self, _url: &str, _resume_from: u64) -> Result<MediaStream> {
        let rx = self
            .chunks
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| RelayError::internal("channel source opened twice"))?;

        let chunks = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (Ok(chunk), rx))
        });
        Ok(MediaStream {
            content_length: Some(PAYLOAD.len() as u64),
            resumed: false,
            chunks: chunks.boxed(),
        })
    }
}

/// Hosting client that fails a fixed number of uploads before succeeding
///
/// With a gate, each upload signals `started` and then waits for the gate.
pub struct ScriptedHosting {
    failures_left: AtomicUsize,
    published: AtomicUsize,
    pub started: Arc<Notify>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedHosting {
    pub fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            published: AtomicUsize::new(0),
            started: Arc::new(Notify::new()),
            gate: None,
        }
    }

    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::failing(0)
        }
    }

    pub fn published(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostingClient for ScriptedHosting {
    async fn reserve_upload_destination(&self) -> Result<UploadDestination> {
        Ok(UploadDestination {
            upload_url: "mem://upload".to_string(),
            progress_url: None,
        })
    }

    async fn stream_bytes(
        &self,
        path: &Path,
        _destination: &UploadDestination,
        on_progress: &UploadProgressFn,
    ) -> Result<String> {
        on_progress(50);

        if let Some(gate) = &self.gate {
            self.started.notify_one();
            gate.notified().await;
        }

        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(RelayError::network_error("connection reset by peer", true));
        }

        on_progress(100);
        Ok(format!("mem://stored/{}", path.display()))
    }

    async fn publish(&self, _locator: &str, _title: &str, _description: &str) -> Result<String> {
        let n = self.published.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("x{}", n))
    }
}

/// Collection with `count` assets, external ids `V-1`..`V-count`
pub async fn seed_collection(db: &Database, title: &str, count: i64) -> (i64, Vec<i64>) {
    seed_collection_as(db, "S-1", "V", title, count).await
}

/// Collection `external_id` with assets `{asset_prefix}-1`..`{asset_prefix}-count`
pub async fn seed_collection_as(
    db: &Database,
    external_id: &str,
    asset_prefix: &str,
    title: &str,
    count: i64,
) -> (i64, Vec<i64>) {
    let collection_id = queries::upsert_collection(db.pool(), &NewCollection::new(external_id, title))
        .await
        .unwrap();

    let mut asset_ids = Vec::new();
    for index in 1..=count {
        let external = format!("{}-{}", asset_prefix, index);
        let id = queries::upsert_asset(db.pool(), collection_id, &NewAsset::new(external, index))
            .await
            .unwrap();
        asset_ids.push(id);
    }
    (collection_id, asset_ids)
}

/// Write a media file for each asset and record its path
pub async fn attach_files(db: &Database, dir: &Path, asset_ids: &[i64]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for id in asset_ids {
        let path = dir.join(format!("asset_{}.mp4", id));
        tokio::fs::write(&path, PAYLOAD).await.unwrap();
        queries::set_asset_path(db.pool(), *id, path.to_str().unwrap())
            .await
            .unwrap();
        paths.push(path);
    }
    paths
}
