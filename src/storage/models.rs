//! Catalog entity models
//!
//! A `Collection` (series) owns ordered `Asset`s (episodes). Both are written
//! by catalog ingestion; the downloader only ever touches `Asset::path`.

use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// TIMESTAMPS
// ============================================================================

/// Format a timestamp for storage.
///
/// Fixed millisecond precision with a `Z` suffix, so lexical order in SQL
/// equals chronological order.
pub fn to_db_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time in storage format
pub fn now_timestamp() -> String {
    to_db_timestamp(Utc::now())
}

/// Parse a stored timestamp
pub fn parse_db_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

// ============================================================================
// MAIN ENTITIES
// ============================================================================

/// Collection entity (a series in the source catalog)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    /// Primary key (auto-increment)
    pub id: i64,
    /// Stable identifier in the source catalog
    pub external_id: String,
    pub title: String,
    pub description: String,
    #[sqlx(default)]
    pub cover_url: Option<String>,
    /// Denormalized number of assets reported by the catalog
    pub episode_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Asset entity (one episode of a collection)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: i64,
    pub series_id: i64,
    /// Stable identifier in the source catalog, used to resolve the stream
    pub external_id: String,
    #[sqlx(default)]
    pub title: Option<String>,
    /// Position within the collection
    pub index_sequence: i64,
    #[sqlx(default)]
    pub duration: Option<i64>,
    #[sqlx(default)]
    pub video_width: Option<i64>,
    #[sqlx(default)]
    pub video_height: Option<i64>,
    #[sqlx(default)]
    pub cover: Option<String>,
    /// Local file, NULL until downloaded
    #[sqlx(default)]
    pub path: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Asset {
    /// True once a download has written a local path
    pub fn is_downloaded(&self) -> bool {
        self.path.as_deref().map_or(false, |p| !p.is_empty())
    }

    /// Title for display, falling back to the external id
    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => &self.external_id,
        }
    }
}

// ============================================================================
// INSERT MODELS
// ============================================================================

/// Collection fields written by ingestion
#[derive(Debug, Clone, Default)]
pub struct NewCollection {
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub cover_url: Option<String>,
    pub episode_count: i64,
}

impl NewCollection {
    pub fn new(external_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Asset fields written by ingestion
#[derive(Debug, Clone, Default)]
pub struct NewAsset {
    pub external_id: String,
    pub title: Option<String>,
    pub index_sequence: i64,
    pub duration: Option<i64>,
    pub video_width: Option<i64>,
    pub video_height: Option<i64>,
    pub cover: Option<String>,
}

impl NewAsset {
    pub fn new(external_id: impl Into<String>, index_sequence: i64) -> Self {
        Self {
            external_id: external_id.into(),
            index_sequence,
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_roundtrip_and_ordering() {
        let early = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let late = early + chrono::Duration::milliseconds(1500);

        let a = to_db_timestamp(early);
        let b = to_db_timestamp(late);

        assert_eq!(a, "2025-03-01T09:00:00.000Z");
        assert!(a < b);
        assert_eq!(parse_db_timestamp(&b).unwrap(), late);
    }
}
