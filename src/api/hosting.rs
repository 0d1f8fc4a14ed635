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


//! Video hosting platform client
//!
//! Publishing a file is three calls:
//! 1. `GET /rest/file/upload` reserves an upload destination
//! 2. the file is POSTed as multipart field `file` to that destination,
//!    which answers with a locator for the stored bytes
//! 3. `POST /rest/video/create` with the locator and metadata publishes it
//!
//! Calls 1 and 3 carry a bearer token from the client-credentials grant.
//! The token is cached and renewed 300 s before the expiry the platform
//! announced.
//!
//! The token, reservation and publish calls are bounded by the request
//! timeout as a whole. The file upload is not: it may run for as long as
//! bytes keep moving, and fails only once the body has stalled for the
//! request timeout.

use super::{parse_json_response, transport_error};
use crate::config::HostingConfig;
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::TryStreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::io::ReaderStream;

/// Lifetime assumed when the token response omits `expires_in`
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Renewal margin before the announced expiry
const TOKEN_SAFETY_MARGIN_SECS: i64 = 300;

/// How often upload progress is sampled while the body streams
const PROGRESS_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Upload progress callback, in whole percent
pub type UploadProgressFn = dyn Fn(u8) + Send + Sync;

/// Where the bytes of the next video go
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadDestination {
    pub upload_url: String,
    #[serde(default)]
    pub progress_url: Option<String>,
}

/// Destination platform for republished videos
#[async_trait]
pub trait HostingClient: Send + Sync {
    /// Reserve a destination for one file
    async fn reserve_upload_destination(&self) -> Result<UploadDestination>;

    /// Send the file, returning the locator of the stored bytes
    async fn stream_bytes(
        &self,
        path: &Path,
        destination: &UploadDestination,
        on_progress: &UploadProgressFn,
    ) -> Result<String>;

    /// Create a public video from a locator, returning its remote id
    async fn publish(&self, locator: &str, title: &str, description: &str) -> Result<String>;

    /// Full reserve, upload and publish sequence
    async fn upload_and_publish(
        &self,
        path: &Path,
        title: &str,
        description: &str,
        on_progress: &UploadProgressFn,
    ) -> Result<String> {
        let destination = self.reserve_upload_destination().await?;
        let locator = self.stream_bytes(path, &destination, on_progress).await?;
        self.publish(&locator, title, description).await
    }
}

/// Public page of a published video
pub fn public_video_url(remote_video_id: &str) -> String {
    format!("https://www.dailymotion.com/video/{}", remote_video_id)
}

/// Whole percent of `sent` over `total`
pub fn upload_percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((sent.min(total) as f64 / total as f64) * 100.0).round() as u8
}

/// Detects an upload body that stopped advancing
#[derive(Debug)]
pub struct StallWatch {
    limit: Duration,
    last_sent: u64,
    last_advance: Instant,
}

impl StallWatch {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            last_sent: 0,
            last_advance: Instant::now(),
        }
    }

    /// Record the byte counter; true once it has not moved for `limit`
    pub fn stalled(&mut self, sent: u64) -> bool {
        let now = Instant::now();
        if sent != self.last_sent {
            self.last_sent = sent;
            self.last_advance = now;
            return false;
        }
        now.duration_since(self.last_advance) >= self.limit
    }
}

/// Cached bearer token
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    /// Already reduced by the safety margin
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Build from a token response received at `now`
    pub fn from_grant(token: String, expires_in: Option<i64>, now: DateTime<Utc>) -> Self {
        let lifetime = expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS) - TOKEN_SAFETY_MARGIN_SECS;
        Self {
            token,
            expires_at: now + ChronoDuration::seconds(lifetime),
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StoredFileResponse {
    #[serde(default)]
    upload_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedVideoResponse {
    id: String,
}

/// Dailymotion partner API client
pub struct DailymotionClient {
    http: Client,
    config: HostingConfig,
    request_timeout: Duration,
    token: Mutex<Option<AccessToken>>,
}

impl DailymotionClient {
    /// Create a client; fails when the credential pair is incomplete
    pub fn new(config: HostingConfig, timeout: Duration) -> Result<Self> {
        if !config.has_credentials() {
            return Err(RelayError::MissingCredentials(
                "hosting client id and secret must both be set".to_string(),
            ));
        }

        let http = Client::builder().connect_timeout(timeout).build()?;
        Ok(Self {
            http,
            config,
            request_timeout: timeout,
            token: Mutex::new(None),
        })
    }

    /// Force a token exchange to check the credentials
    pub async fn test_connection(&self) -> Result<()> {
        let token = self.authenticate().await?;
        *self.token.lock().await = Some(token);
        tracing::info!("hosting credentials accepted");
        Ok(())
    }

    async fn authenticate(&self) -> Result<AccessToken> {
        let client_id = self.config.client_id.as_deref().unwrap_or_default();
        let client_secret = self.config.client_secret.as_deref().unwrap_or_default();

        let response = self
            .http
            .post(&self.config.token_url)
            .timeout(self.request_timeout)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("scope", self.config.scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| transport_error("Token request failed", e))?;

        let grant: TokenResponse = parse_json_response(response).await.map_err(|e| {
            tracing::error!(error = %e, "hosting authentication failed");
            RelayError::AuthenticationFailed(e.to_string())
        })?;

        tracing::debug!(expires_in = ?grant.expires_in, "hosting token issued");
        Ok(AccessToken::from_grant(grant.access_token, grant.expires_in, Utc::now()))
    }

    /// Cached token, renewed when it is missing or past its margin
    async fn bearer_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_valid_at(Utc::now()) {
                return Ok(token.token.clone());
            }
        }

        let fresh = self.authenticate().await?;
        let value = fresh.token.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl HostingClient for DailymotionClient {
    async fn reserve_upload_destination(&self) -> Result<UploadDestination> {
        let token = self.bearer_token().await?;

        let response = self
            .http
            .get(self.api_url("/rest/file/upload"))
            .timeout(self.request_timeout)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| transport_error("Upload reservation failed", e))?;

        parse_json_response(response).await
    }

    async fn stream_bytes(
        &self,
        path: &Path,
        destination: &UploadDestination,
        on_progress: &UploadProgressFn,
    ) -> Result<String> {
        let file = tokio::fs::File::open(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RelayError::MediaFileNotFound(path.display().to_string()),
            _ => RelayError::IoError(e),
        })?;
        let total = file.metadata().await?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video.mp4".to_string());

        tracing::info!(path = %path.display(), bytes = total, "uploading file");

        let sent = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&sent);
        let body = ReaderStream::new(file).inspect_ok(move |chunk| {
            counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        });

        let part = Part::stream_with_length(Body::wrap_stream(body), total)
            .file_name(file_name)
            .mime_str("video/mp4")?;
        let form = Form::new().part("file", part);

        let request = self.http.post(&destination.upload_url).multipart(form).send();
        tokio::pin!(request);

        let mut ticker = tokio::time::interval(PROGRESS_SAMPLE_INTERVAL);
        let mut stall = StallWatch::new(self.request_timeout);
        let mut last_reported: Option<u8> = None;
        let response = loop {
            tokio::select! {
                result = &mut request => {
                    break result.map_err(|e| transport_error("File upload failed", e))?;
                }
                _ = ticker.tick() => {
                    let sent_now = sent.load(Ordering::Relaxed);
                    if stall.stalled(sent_now) {
                        tracing::warn!(path = %path.display(), sent = sent_now, bytes = total, "upload stalled");
                        return Err(RelayError::Timeout(self.request_timeout.as_secs()));
                    }
                    let percent = upload_percent(sent_now, total);
                    if last_reported != Some(percent) {
                        on_progress(percent);
                        last_reported = Some(percent);
                    }
                }
            }
        };

        let stored: StoredFileResponse = parse_json_response(response).await?;
        if last_reported != Some(100) {
            on_progress(100);
        }

        stored
            .upload_url
            .or(stored.url)
            .filter(|locator| !locator.is_empty())
            .ok_or_else(|| RelayError::InvalidApiResponse("Upload response carried no file locator".to_string()))
    }

    async fn publish(&self, locator: &str, title: &str, description: &str) -> Result<String> {
        let token = self.bearer_token().await?;

        let response = self
            .http
            .post(self.api_url("/rest/video/create"))
            .timeout(self.request_timeout)
            .bearer_auth(token)
            .json(&serde_json::json!({
                "url": locator,
                "title": title,
                "description": description,
                "published": true,
            }))
            .send()
            .await
            .map_err(|e| transport_error("Publish request failed", e))?;

        let created: CreatedVideoResponse = parse_json_response(response).await?;
        tracing::info!(remote_video_id = %created.id, "video published");
        Ok(created.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn credentials() -> HostingConfig {
        HostingConfig {
            client_id: Some("id".to_string()),
            client_secret: Some("secret".to_string()),
            ..HostingConfig::default()
        }
    }

    #[test]
    fn test_token_expiry_has_safety_margin() {
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap();
        let token = AccessToken::from_grant("t".to_string(), Some(3600), now);

        assert_eq!(token.expires_at, now + ChronoDuration::seconds(3300));
        assert!(token.is_valid_at(now + ChronoDuration::seconds(3299)));
        assert!(!token.is_valid_at(now + ChronoDuration::seconds(3300)));

        let token = AccessToken::from_grant("t".to_string(), None, now);
        assert_eq!(token.expires_at, now + ChronoDuration::seconds(3300));
    }

    #[test]
    fn test_upload_percent() {
        assert_eq!(upload_percent(0, 0), 0);
        assert_eq!(upload_percent(1, 3), 33);
        assert_eq!(upload_percent(2, 3), 67);
        assert_eq!(upload_percent(5, 3), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_watch_resets_on_progress() {
        let mut watch = StallWatch::new(Duration::from_secs(300));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(!watch.stalled(0));

        // A long upload that keeps moving never trips the watch
        for step in 1..=20u64 {
            tokio::time::advance(Duration::from_secs(60)).await;
            assert!(!watch.stalled(step * 1024));
        }

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(!watch.stalled(20 * 1024));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(watch.stalled(20 * 1024));
    }

    #[test]
    fn test_requires_credentials() {
        let err = DailymotionClient::new(HostingConfig::default(), Duration::from_secs(5)).err().unwrap();
        assert!(matches!(err, RelayError::MissingCredentials(_)));

        assert!(DailymotionClient::new(credentials(), Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_api_url_joins_base() {
        let mut config = credentials();
        config.api_base = "https://api.example.test/".to_string();
        let client = DailymotionClient::new(config, Duration::from_secs(5)).unwrap();
        assert_eq!(client.api_url("/rest/file/upload"), "https://api.example.test/rest/file/upload");
    }

    #[test]
    fn test_public_video_url() {
        assert_eq!(public_video_url("x8abc"), "https://www.dailymotion.com/video/x8abc");
    }
}
