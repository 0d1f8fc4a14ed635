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


use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use series_relay::api::{DailymotionClient, HttpCatalogClient, HttpStreamResolver};
use series_relay::download::HttpMediaSource;
use series_relay::{logging, Database, Outcome, RelayConfig, RelayService};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "SeriesRelay CLI - mirror, download and republish collections", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a collection from the catalog and store it
    Ingest {
        /// Catalog identifier of the collection
        external_id: String,
    },
    /// Download every missing episode of a collection
    Download {
        collection_id: i64,
        /// Episodes fetched concurrently per batch
        #[arg(short, long)]
        concurrency: Option<usize>,
    },
    /// Inspect or maintain the download queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Manage the upload timetable
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
    /// Run the upload scheduler until interrupted
    Run,
    /// Upload one downloaded episode right away
    TestUpload { asset_id: i64 },
    /// Check the hosting platform credentials
    TestAuth,
}

#[derive(Subcommand)]
enum QueueAction {
    Status {
        #[arg(long)]
        collection: Option<i64>,
    },
    /// Remove completed and failed jobs
    Clear {
        #[arg(long)]
        collection: Option<i64>,
    },
    /// Reset failed jobs to pending
    Retry {
        #[arg(long)]
        collection: Option<i64>,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Schedule a fully downloaded collection, one episode per hour
    Add { collection_id: i64 },
    List {
        #[arg(long)]
        collection: Option<i64>,
    },
    /// Remove pending and failed uploads of a collection
    Remove { collection_id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let config = RelayConfig::from_env().context("failed to load configuration")?;

    if let Commands::TestAuth = cli.command {
        let client = DailymotionClient::new(config.hosting.clone(), config.transfer_timeout)?;
        client.test_connection().await?;
        println!("✅ Hosting credentials are valid");
        return Ok(());
    }

    let service = build_service(config).await?;

    match cli.command {
        Commands::Ingest { external_id } => {
            let report = service.ingest_collection(&external_id).await?;
            println!(
                "Stored \"{}\" as series {} with {} episodes",
                report.title, report.collection_id, report.asset_count
            );
        }
        Commands::Download { collection_id, concurrency } => {
            print_outcome(&service.download_collection(collection_id, concurrency).await?);
        }
        Commands::Queue { action } => match action {
            QueueAction::Status { collection } => {
                let status = service.queue_status(collection).await?;
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            QueueAction::Clear { collection } => print_outcome(&service.clear_queue(collection).await?),
            QueueAction::Retry { collection } => print_outcome(&service.retry_failed(collection).await?),
        },
        Commands::Schedule { action } => match action {
            ScheduleAction::Add { collection_id } => {
                print_outcome(&service.schedule_collection(collection_id).await?);
            }
            ScheduleAction::List { collection } => {
                let schedule = service.upload_schedule(collection).await?;
                println!("{}", serde_json::to_string_pretty(&schedule)?);
            }
            ScheduleAction::Remove { collection_id } => {
                print_outcome(&service.remove_schedule(collection_id).await?);
            }
        },
        Commands::Run => run_scheduler(&service).await?,
        Commands::TestUpload { asset_id } => {
            let upload = service.test_upload(asset_id).await?;
            println!("Uploaded \"{}\": {}", upload.title, upload.url);
        }
        Commands::TestAuth => {}
    }

    Ok(())
}

/// Open the store and attach every collaborator the configuration allows
async fn build_service(config: RelayConfig) -> Result<RelayService> {
    let db = Database::new(&config.database_path)
        .await
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;

    let timeout = config.transfer_timeout;
    let catalog_endpoint = config.catalog_endpoint.clone();
    let stream_endpoint = config.stream_endpoint.clone();
    let hosting = config.hosting.clone();

    let mut service = RelayService::new(db, config);

    if let Some(endpoint) = catalog_endpoint {
        service = service.with_catalog(Arc::new(HttpCatalogClient::new(&endpoint, timeout)?));
    }
    if let Some(endpoint) = stream_endpoint {
        service = service.with_downloads(
            Arc::new(HttpStreamResolver::new(&endpoint, timeout)?),
            Arc::new(HttpMediaSource::new(timeout)?),
        );
    }
    if hosting.has_credentials() {
        service = service.with_hosting(Arc::new(DailymotionClient::new(hosting, timeout)?));
    }

    Ok(service)
}

async fn run_scheduler(service: &RelayService) -> Result<()> {
    let mut frames = service.subscribe();
    service.start_scheduler()?;
    println!("Upload scheduler running, press Ctrl-C to stop");

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => println!("{}", frame),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    service.stop_scheduler();
    println!("Upload scheduler stopped");
    Ok(())
}

fn print_outcome(outcome: &Outcome) {
    let marker = if outcome.success { "✅" } else { "⚠️ " };
    println!("{} {}", marker, outcome.message);
}
