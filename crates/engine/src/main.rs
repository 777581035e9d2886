//! `tokosync` command-line entry point: inspect and drive the local sync queue.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

use tokosync_engine::{
    ConnectivityFlag, DataStore, DatabaseLocation, QueueItemId, SyncConfig, SyncEvent, SyncWorker,
};
use tokosync_observability::LogFormat;

#[derive(Parser, Debug)]
#[command(name = "tokosync")]
#[command(about = "Local-first sync engine: inspect and replay queued mutations", long_about = None)]
struct Args {
    /// Backend base URL (overrides TOKOSYNC_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Local database path, or `:memory:` (overrides TOKOSYNC_DB_PATH)
    #[arg(long, global = true)]
    db: Option<String>,

    /// Log output format: json or pretty
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Queue counts, last sync and backend reachability
    Status,
    /// List pending queue items
    Pending,
    /// List queue items that exhausted their retries
    Failed,
    /// Probe the backend and drain the queue once
    Sync,
    /// Move failed items back to pending
    RetryFailed {
        /// Retry a single item instead of all of them
        #[arg(long)]
        id: Option<i64>,
    },
    /// Purge leftover completed rows
    ClearCompleted,
    /// Run the background worker until Ctrl-C
    Watch {
        /// Tick interval in seconds (overrides TOKOSYNC_SYNC_INTERVAL_SECS)
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tokosync_observability::tracing::init(args.log_format);

    let mut config = SyncConfig::from_env().context("failed to load configuration")?;
    if let Some(url) = args.api_url {
        config.api_url = url.trim_end_matches('/').to_string();
    }
    if let Some(db) = args.db {
        config = config.with_database(DatabaseLocation::parse(&db));
    }

    // Unknown until probed; assume offline so nothing is sent blindly.
    let flag = ConnectivityFlag::offline();
    let data_store = DataStore::from_config(&config, Arc::new(flag.clone()));

    match args.command {
        Command::Status => {
            let online = probe(&data_store, &flag).await;
            let stats = data_store.queue().stats().await?;
            let metadata = data_store.metadata().load().await?;
            print_json(&json!({
                "apiUrl": config.api_url,
                "online": online,
                "queue": stats,
                "metadata": metadata,
            }))?;
        }
        Command::Pending => print_json(&data_store.queue().list_pending().await?)?,
        Command::Failed => print_json(&data_store.queue().list_failed().await?)?,
        Command::Sync => {
            if !probe(&data_store, &flag).await {
                anyhow::bail!("backend at {} is unreachable; nothing synced", config.api_url);
            }
            let report = data_store.sync_pending().await.context("sync failed")?;
            print_json(&report)?;
        }
        Command::RetryFailed { id: Some(id) } => {
            let item = data_store
                .queue()
                .retry(QueueItemId::from(id))
                .await
                .with_context(|| format!("failed to retry queue item {id}"))?;
            print_json(&item)?;
        }
        Command::RetryFailed { id: None } => {
            let retried = data_store.queue().retry_failed().await?;
            print_json(&json!({ "retried": retried }))?;
        }
        Command::ClearCompleted => {
            let cleared = data_store.queue().clear_completed().await?;
            print_json(&json!({ "cleared": cleared }))?;
        }
        Command::Watch { interval } => {
            let interval = interval
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(config.sync_interval);
            watch(data_store, flag, interval).await?;
        }
    }

    Ok(())
}

async fn probe(data_store: &DataStore, flag: &ConnectivityFlag) -> bool {
    let online = data_store.api().check_connectivity().await;
    if online {
        flag.set_online();
    } else {
        flag.set_offline();
    }
    online
}

async fn watch(data_store: DataStore, flag: ConnectivityFlag, interval: Duration) -> anyhow::Result<()> {
    let worker = SyncWorker::new(data_store, flag, interval);
    let mut events = worker.subscribe();
    let handle = worker.start();

    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let stop = event == SyncEvent::Stopped;
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{line}");
            }
            if stop {
                break;
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("shutting down");

    handle.shutdown().await;
    let _ = printer.await;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{out}");
    Ok(())
}
