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


//! Source catalog access
//!
//! # Response shapes
//! Collection detail:
//! ```json
//! {"data": {"video_data": {
//!     "series_title": "...", "series_intro": "...", "series_cover": "...",
//!     "episode_cnt": 60,
//!     "video_list": [{"vid": "...", "vid_index": 1, "title": "...", "duration": 90}]
//! }}}
//! ```
//! Stream lookups answer with one of several layouts; see [`extract_stream_url`].

use super::{parse_json_response, transport_error};
use crate::download::stream::BROWSER_USER_AGENT;
use crate::error::{RelayError, Result};
use crate::storage::models::{NewAsset, NewCollection};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// One asset as listed by the catalog
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogAsset {
    pub external_id: String,
    pub title: Option<String>,
    pub index_sequence: i64,
    pub duration: Option<i64>,
    pub video_width: Option<i64>,
    pub video_height: Option<i64>,
    pub cover: Option<String>,
}

/// Collection metadata with its asset list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionDetail {
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub cover_url: Option<String>,
    /// Count announced by the catalog, which may exceed `assets.len()`
    pub episode_count: i64,
    pub assets: Vec<CatalogAsset>,
}

impl CollectionDetail {
    pub fn to_new_collection(&self) -> NewCollection {
        NewCollection {
            external_id: self.external_id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            cover_url: self.cover_url.clone(),
            episode_count: self.episode_count.max(self.assets.len() as i64),
        }
    }
}

impl From<&CatalogAsset> for NewAsset {
    fn from(asset: &CatalogAsset) -> Self {
        NewAsset {
            external_id: asset.external_id.clone(),
            title: asset.title.clone(),
            index_sequence: asset.index_sequence,
            duration: asset.duration,
            video_width: asset.video_width,
            video_height: asset.video_height,
            cover: asset.cover.clone(),
        }
    }
}

/// Source catalog metadata lookups
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn fetch_collection_detail(&self, external_id: &str) -> Result<CollectionDetail>;
}

/// Resolution of an asset to a downloadable URL
#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// `Ok(None)` when the catalog answered but carried no usable URL
    async fn resolve_stream_url(&self, external_asset_id: &str) -> Result<Option<String>>;
}

/// Find the stream URL in a lookup response
///
/// Looks under `data` (or the root when absent) for the first element of
/// `video_list`, `video_info` or `videos`, then at the object itself, taking
/// the first non-empty of `play_url`, `url`, `video_url`, `main_url`.
pub fn extract_stream_url(response: &Value) -> Option<String> {
    const LIST_KEYS: [&str; 3] = ["video_list", "video_info", "videos"];
    const URL_KEYS: [&str; 4] = ["play_url", "url", "video_url", "main_url"];

    let data = response.get("data").unwrap_or(response);

    let url_in = |object: &Value| -> Option<String> {
        URL_KEYS
            .iter()
            .filter_map(|key| object.get(*key).and_then(Value::as_str))
            .find(|url| !url.is_empty())
            .map(str::to_string)
    };

    for key in LIST_KEYS {
        let first = match data.get(key) {
            Some(Value::Array(items)) => items.first(),
            Some(object @ Value::Object(_)) => Some(object),
            _ => None,
        };
        if let Some(url) = first.and_then(|item| url_in(item)) {
            return Some(url);
        }
    }

    url_in(data)
}

/// Decode a collection detail response
pub fn parse_collection_detail(external_id: &str, response: &Value) -> Result<CollectionDetail> {
    let info = response
        .pointer("/data/video_data")
        .ok_or_else(|| RelayError::InvalidApiResponse("Missing data.video_data in collection detail".to_string()))?;

    let text = |value: &Value, key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
    let number = |value: &Value, key: &str| value.get(key).and_then(Value::as_i64);

    let assets = info
        .get("video_list")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let external_id = match item.get("vid") {
                        Some(Value::String(s)) if !s.is_empty() => s.clone(),
                        Some(Value::Number(n)) => n.to_string(),
                        _ => return None,
                    };
                    Some(CatalogAsset {
                        external_id,
                        title: text(item, "title").filter(|t| !t.is_empty()),
                        index_sequence: number(item, "vid_index").unwrap_or(0),
                        duration: number(item, "duration"),
                        video_width: number(item, "video_width"),
                        video_height: number(item, "video_height"),
                        cover: text(item, "episode_cover").filter(|c| !c.is_empty()),
                    })
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    Ok(CollectionDetail {
        external_id: external_id.to_string(),
        title: text(info, "series_title").unwrap_or_default(),
        description: text(info, "series_intro").unwrap_or_default(),
        cover_url: text(info, "series_cover"),
        episode_count: number(info, "episode_cnt").unwrap_or(0),
        assets,
    })
}

fn build_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .timeout(timeout)
        .build()?)
}

/// HTTP catalog client
///
/// Queries `{endpoint}?series_id={external id}`.
#[derive(Debug, Clone)]
pub struct HttpCatalogClient {
    client: Client,
    endpoint: Url,
}

impl HttpCatalogClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| RelayError::InvalidConfiguration(format!("Invalid catalog endpoint {}: {}", endpoint, e)))?;
        Ok(Self {
            client: build_client(timeout)?,
            endpoint,
        })
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn fetch_collection_detail(&self, external_id: &str) -> Result<CollectionDetail> {
        tracing::debug!(external_id, "fetching collection detail");

        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("series_id", external_id)])
            .send()
            .await
            .map_err(|e| transport_error("Catalog request failed", e))?;

        let body: Value = parse_json_response(response).await?;
        parse_collection_detail(external_id, &body)
    }
}

/// HTTP stream resolver
///
/// Queries `{endpoint}?video_id={external asset id}`.
#[derive(Debug, Clone)]
pub struct HttpStreamResolver {
    client: Client,
    endpoint: Url,
}

impl HttpStreamResolver {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| RelayError::InvalidConfiguration(format!("Invalid stream endpoint {}: {}", endpoint, e)))?;
        Ok(Self {
            client: build_client(timeout)?,
            endpoint,
        })
    }
}

#[async_trait]
impl StreamResolver for HttpStreamResolver {
    async fn resolve_stream_url(&self, external_asset_id: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("video_id", external_asset_id)])
            .send()
            .await
            .map_err(|e| transport_error("Stream lookup failed", e))?;

        let body: Value = parse_json_response(response).await?;
        let url = extract_stream_url(&body);
        if url.is_none() {
            tracing::warn!(external_asset_id, "stream lookup returned no usable url");
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_from_list_under_data() {
        let body = json!({"data": {"video_list": [{"main_url": "https://cdn/a.mp4"}, {"url": "https://cdn/b.mp4"}]}});
        assert_eq!(extract_stream_url(&body).as_deref(), Some("https://cdn/a.mp4"));
    }

    #[test]
    fn test_extract_prefers_play_url() {
        let body = json!({"videos": [{"url": "https://cdn/u.mp4", "play_url": "https://cdn/p.mp4"}]});
        assert_eq!(extract_stream_url(&body).as_deref(), Some("https://cdn/p.mp4"));
    }

    #[test]
    fn test_extract_direct_fields_and_missing() {
        let body = json!({"data": {"video_url": "https://cdn/direct.mp4"}});
        assert_eq!(extract_stream_url(&body).as_deref(), Some("https://cdn/direct.mp4"));

        let body = json!({"data": {"video_list": [], "play_url": ""}});
        assert_eq!(extract_stream_url(&body), None);
    }

    #[test]
    fn test_parse_collection_detail() {
        let body = json!({"data": {"video_data": {
            "series_title": "Moonlit Vows",
            "series_intro": "A wedding nobody planned.",
            "series_cover": "https://cdn/cover.jpg",
            "episode_cnt": 3,
            "video_list": [
                {"vid": "111", "vid_index": 1, "title": "Ep 1", "duration": 95},
                {"vid": 222, "vid_index": 2},
                {"title": "missing id"}
            ]
        }}});

        let detail = parse_collection_detail("S-9", &body).unwrap();
        assert_eq!(detail.title, "Moonlit Vows");
        assert_eq!(detail.assets.len(), 2);
        assert_eq!(detail.assets[1].external_id, "222");
        assert_eq!(detail.assets[0].duration, Some(95));

        let collection = detail.to_new_collection();
        assert_eq!(collection.episode_count, 3);
        assert_eq!(collection.description, "A wedding nobody planned.");
    }

    #[test]
    fn test_parse_collection_detail_rejects_unknown_shape() {
        let err = parse_collection_detail("S-9", &json!({"data": {}})).unwrap_err();
        assert!(matches!(err, RelayError::InvalidApiResponse(_)));
    }
}
