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


//! Media byte sources
//!
//! # Resume Mechanism
//! 1. A leftover `.part` file of `n` bytes means a previous attempt died
//! 2. The source is opened with `resume_from = n` (HTTP: `Range: bytes=n-`)
//! 3. On `206 Partial Content` the caller appends to the partial file
//! 4. On `200 OK` the server ignored the range and the caller starts over

use crate::error::{RelayError, Result};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Browser user agent sent to media CDNs
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// An open byte stream
pub struct MediaStream {
    /// Bytes the stream will yield, when announced
    pub content_length: Option<u64>,
    /// True when the stream continues at the requested offset
    pub resumed: bool,
    pub chunks: BoxStream<'static, Result<Vec<u8>>>,
}

impl MediaStream {
    /// Stream over in-memory chunks
    pub fn from_chunks(chunks: Vec<Vec<u8>>) -> Self {
        let length = chunks.iter().map(|c| c.len() as u64).sum();
        Self {
            content_length: Some(length),
            resumed: false,
            chunks: futures_util::stream::iter(chunks.into_iter().map(Ok)).boxed(),
        }
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("content_length", &self.content_length)
            .field("resumed", &self.resumed)
            .finish_non_exhaustive()
    }
}

/// Opens byte streams for resolved media URLs
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Open `url`, asking to skip the first `resume_from` bytes
    ///
    /// Sources that cannot honour the offset return a stream from the start
    /// with `resumed = false`.
    async fn open(&self, url: &str, resume_from: u64) -> Result<MediaStream>;
}

/// HTTP media source
#[derive(Debug, Clone)]
pub struct HttpMediaSource {
    client: Client,
}

impl HttpMediaSource {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MediaSource for HttpMediaSource {
    async fn open(&self, url: &str, resume_from: u64) -> Result<MediaStream> {
        let mut request = self.client.get(url);
        if resume_from > 0 {
            request = request.header("Range", format!("bytes={}-", resume_from));
        }

        let response = request.send().await.map_err(|e| {
            RelayError::network_error(format!("Failed to reach media host: {}", e), e.is_timeout() || e.is_connect())
        })?;

        let resumed = match response.status() {
            StatusCode::OK => false,
            StatusCode::PARTIAL_CONTENT => resume_from > 0,
            StatusCode::RANGE_NOT_SATISFIABLE => {
                // Partial file is stale; caller restarts without an offset
                return Err(RelayError::UnexpectedStatusCode {
                    status_code: StatusCode::RANGE_NOT_SATISFIABLE.as_u16(),
                    url: url.to_string(),
                });
            }
            status => {
                return Err(RelayError::UnexpectedStatusCode {
                    status_code: status.as_u16(),
                    url: url.to_string(),
                });
            }
        };

        let content_length = response.content_length();
        let chunks = response
            .bytes_stream()
            .map_ok(|bytes| bytes.to_vec())
            .map_err(RelayError::from)
            .boxed();

        Ok(MediaStream {
            content_length,
            resumed,
            chunks,
        })
    }
}
