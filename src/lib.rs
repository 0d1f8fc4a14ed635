//! SeriesRelay core
//!
//! Mirrors episodic video collections from a source catalog into a local
//! store, downloads their media in bounded batches and republishes them to
//! a hosting platform on an hourly timetable.
//!
//! # Modules
//! - `storage`: SQLite store for collections, assets and both job tables
//! - `api`: catalog, stream resolver and hosting platform clients
//! - `download`: download queue and the batch downloader
//! - `upload`: upload schedule, publisher and the periodic scheduler
//! - `events`: progress events and the observer broadcaster
//! - `service`: the request-facing façade over all of the above

pub mod api;
pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod file;
pub mod logging;
pub mod service;
pub mod storage;
pub mod upload;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use events::{Broadcaster, EventSink, ProgressEvent};
pub use service::{IngestReport, Outcome, RelayService};
pub use storage::Database;
