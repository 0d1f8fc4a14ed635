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


//! Database storage and models
//!
//! This module handles all database operations using SQLite via sqlx.
//!
//! # Database Schema
//! - series: collections ingested from the source catalog
//! - episodes: assets of a collection, with the local file path once downloaded
//! - download_queue: one row per asset scheduled for fetch
//! - upload_schedule: one row per asset scheduled for republishing
//!
//! Deleting a series cascades to its episodes and to both job tables.
//!
//! # Usage Example
//! ```no_run
//! use series_relay::storage::{Database, queries, models::NewCollection};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new("./data/relay.db").await?;
//!
//! let collection_id = queries::upsert_collection(
//!     db.pool(),
//!     &NewCollection::new("7498275267933113345", "Some Series"),
//! ).await?;
//! let pending = queries::assets_to_download(db.pool(), collection_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;

// Re-export commonly used types
pub use database::Database;
pub use models::{Asset, Collection, NewAsset, NewCollection};
