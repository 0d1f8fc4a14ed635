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


//! Collection and asset queries
//!
//! Repository functions for the catalog tables. The job queues have their
//! own managers in `download::queue` and `upload`.

use crate::error::Result;
use crate::storage::models::*;
use sqlx::SqlitePool;

// ============================================================================
// COLLECTION QUERIES
// ============================================================================

/// Insert or update a collection by external id
///
/// Returns the row id.
pub async fn upsert_collection(pool: &SqlitePool, collection: &NewCollection) -> Result<i64> {
    let now = now_timestamp();

    sqlx::query(
        r#"
        INSERT INTO series (external_id, title, description, cover_url, episode_count, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(external_id) DO UPDATE SET
            title = excluded.title,
            description = excluded.description,
            cover_url = excluded.cover_url,
            episode_count = excluded.episode_count,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&collection.external_id)
    .bind(&collection.title)
    .bind(&collection.description)
    .bind(&collection.cover_url)
    .bind(collection.episode_count)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    let id: i64 = sqlx::query_scalar("SELECT id FROM series WHERE external_id = ?")
        .bind(&collection.external_id)
        .fetch_one(pool)
        .await?;

    Ok(id)
}

/// Find collection by row id
pub async fn find_collection(pool: &SqlitePool, collection_id: i64) -> Result<Option<Collection>> {
    let collection = sqlx::query_as::<_, Collection>("SELECT * FROM series WHERE id = ?")
        .bind(collection_id)
        .fetch_optional(pool)
        .await?;

    Ok(collection)
}

/// Delete a collection; assets and both job queues cascade
pub async fn delete_collection(pool: &SqlitePool, collection_id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM series WHERE id = ?")
        .bind(collection_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// ============================================================================
// ASSET QUERIES
// ============================================================================

/// Insert or update an asset by external id
///
/// Metadata is refreshed on re-sync; a local path already written by the
/// downloader is left alone.
pub async fn upsert_asset(pool: &SqlitePool, collection_id: i64, asset: &NewAsset) -> Result<i64> {
    let now = now_timestamp();

    sqlx::query(
        r#"
        INSERT INTO episodes (
            series_id, external_id, title, index_sequence, duration,
            video_width, video_height, cover, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(external_id) DO UPDATE SET
            title = excluded.title,
            index_sequence = excluded.index_sequence,
            duration = excluded.duration,
            video_width = excluded.video_width,
            video_height = excluded.video_height,
            cover = excluded.cover,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(collection_id)
    .bind(&asset.external_id)
    .bind(&asset.title)
    .bind(asset.index_sequence)
    .bind(asset.duration)
    .bind(asset.video_width)
    .bind(asset.video_height)
    .bind(&asset.cover)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    let id: i64 = sqlx::query_scalar("SELECT id FROM episodes WHERE external_id = ?")
        .bind(&asset.external_id)
        .fetch_one(pool)
        .await?;

    Ok(id)
}

/// Find asset by row id
pub async fn find_asset(pool: &SqlitePool, asset_id: i64) -> Result<Option<Asset>> {
    let asset = sqlx::query_as::<_, Asset>("SELECT * FROM episodes WHERE id = ?")
        .bind(asset_id)
        .fetch_optional(pool)
        .await?;

    Ok(asset)
}

/// All assets of a collection in position order
pub async fn list_assets(pool: &SqlitePool, collection_id: i64) -> Result<Vec<Asset>> {
    let assets = sqlx::query_as::<_, Asset>(
        "SELECT * FROM episodes WHERE series_id = ? ORDER BY index_sequence ASC",
    )
    .bind(collection_id)
    .fetch_all(pool)
    .await?;

    Ok(assets)
}

/// Assets of a collection that have no local file yet, in position order
pub async fn assets_to_download(pool: &SqlitePool, collection_id: i64) -> Result<Vec<Asset>> {
    let assets = sqlx::query_as::<_, Asset>(
        r#"
        SELECT * FROM episodes
        WHERE series_id = ? AND (path IS NULL OR path = '')
        ORDER BY index_sequence ASC
        "#,
    )
    .bind(collection_id)
    .fetch_all(pool)
    .await?;

    Ok(assets)
}

/// Number of assets in a collection
pub async fn count_assets(pool: &SqlitePool, collection_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM episodes WHERE series_id = ?")
        .bind(collection_id)
        .fetch_one(pool)
        .await?;

    Ok(count)
}

/// Record the local file of a downloaded asset
pub async fn set_asset_path(pool: &SqlitePool, asset_id: i64, path: &str) -> Result<()> {
    sqlx::query("UPDATE episodes SET path = ?, updated_at = ? WHERE id = ?")
        .bind(path)
        .bind(now_timestamp())
        .bind(asset_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    async fn seeded() -> (Database, i64) {
        let db = Database::new_in_memory().await.unwrap();
        let collection_id = upsert_collection(
            db.pool(),
            &NewCollection::new("S-1", "First Series").with_description("intro"),
        )
        .await
        .unwrap();

        for (vid, index) in [("V-3", 3), ("V-1", 1), ("V-2", 2)] {
            upsert_asset(db.pool(), collection_id, &NewAsset::new(vid, index))
                .await
                .unwrap();
        }

        (db, collection_id)
    }

    #[tokio::test]
    async fn test_upsert_collection_is_stable() {
        let (db, collection_id) = seeded().await;

        let again = upsert_collection(db.pool(), &NewCollection::new("S-1", "Renamed"))
            .await
            .unwrap();
        assert_eq!(again, collection_id);

        let collection = find_collection(db.pool(), collection_id).await.unwrap().unwrap();
        assert_eq!(collection.title, "Renamed");
    }

    #[tokio::test]
    async fn test_assets_to_download_ordered_and_filtered() {
        let (db, collection_id) = seeded().await;

        let pending = assets_to_download(db.pool(), collection_id).await.unwrap();
        let order: Vec<i64> = pending.iter().map(|a| a.index_sequence).collect();
        assert_eq!(order, vec![1, 2, 3]);

        set_asset_path(db.pool(), pending[0].id, "/tmp/ep1.mp4").await.unwrap();
        let pending = assets_to_download(db.pool(), collection_id).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(count_assets(db.pool(), collection_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_resync_keeps_downloaded_path() {
        let (db, collection_id) = seeded().await;
        let asset_id = upsert_asset(db.pool(), collection_id, &NewAsset::new("V-1", 1))
            .await
            .unwrap();
        set_asset_path(db.pool(), asset_id, "/tmp/ep1.mp4").await.unwrap();

        upsert_asset(db.pool(), collection_id, &NewAsset::new("V-1", 1).with_title("Pilot"))
            .await
            .unwrap();

        let asset = find_asset(db.pool(), asset_id).await.unwrap().unwrap();
        assert_eq!(asset.title.as_deref(), Some("Pilot"));
        assert!(asset.is_downloaded());
    }

    #[tokio::test]
    async fn test_delete_collection_cascades() {
        let (db, collection_id) = seeded().await;

        assert!(delete_collection(db.pool(), collection_id).await.unwrap());
        assert_eq!(count_assets(db.pool(), collection_id).await.unwrap(), 0);
        assert!(!delete_collection(db.pool(), collection_id).await.unwrap());
    }
}
