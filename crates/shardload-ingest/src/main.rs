//! Shardload Ingest - download a dataset and bulk-load it into a sharded table

use anyhow::{Context, Result};
use clap::Parser;
use shardload_common::logging::{init_logging, LogConfig, LogLevel};
use shardload_ingest::config::{
    ChunkFailurePolicy, DatasetConfig, IngestConfig, RegistrarKind, DEFAULT_BATCH_SIZE,
    DEFAULT_CONCURRENCY, DEFAULT_DATASETS_DIR, DEFAULT_DOWNLOAD_DIR, DEFAULT_MAX_PARALLEL_DOWNLOADS,
    DEFAULT_SHARD_COUNT, DEFAULT_TABLE_NAME,
};
use shardload_ingest::download::{DownloadManager, DownloadOptions, DownloadTask};
use shardload_ingest::loader::{registrar_for, BulkLoader, LoaderOptions, PgStore};
use shardload_ingest::pipeline::IngestPipeline;
use shardload_ingest::reporter::{IngestCounter, ThroughputReporter};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "shardload-ingest")]
#[command(author, version, about = "Download a dataset and bulk-load it into a sharded Postgres table")]
struct Cli {
    /// Postgres connection string
    #[arg(short = 'd', long, env = "DATABASE_URL")]
    database_url: String,

    /// Dataset name; its config is read from `<datasets-dir>/<dataset>.toml`
    #[arg(short = 's', long)]
    dataset: String,

    #[arg(long, default_value = DEFAULT_DATASETS_DIR)]
    datasets_dir: PathBuf,

    #[arg(long, default_value = DEFAULT_DOWNLOAD_DIR)]
    download_dir: PathBuf,

    /// Rows per micro-batch
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Parallel loader workers (and pooled connections)
    #[arg(short, long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Transfers in flight at once
    #[arg(long, default_value_t = DEFAULT_MAX_PARALLEL_DOWNLOADS)]
    max_parallel: usize,

    #[arg(long, default_value_t = DEFAULT_SHARD_COUNT)]
    shard_count: u32,

    /// Target table (dropped and recreated)
    #[arg(long, default_value = DEFAULT_TABLE_NAME)]
    table: String,

    /// What to do when a chunk fails to load: abort or skip
    #[arg(long, default_value = "abort")]
    on_chunk_error: ChunkFailurePolicy,

    /// Shard registration: citus, citus-legacy or none
    #[arg(long, default_value = "citus")]
    registrar: RegistrarKind,

    /// Use files already under the download directory
    #[arg(long)]
    skip_download: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            batch_size: self.batch_size,
            concurrency: self.concurrency,
            max_parallel_downloads: self.max_parallel,
            shard_count: self.shard_count,
            table_name: self.table.clone(),
            download_dir: self.download_dir.clone(),
            on_chunk_error: self.on_chunk_error,
            registrar: self.registrar,
            ..IngestConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // LOG_* variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("shardload-ingest")
        .filter_directives("sqlx=warn,hyper=warn,reqwest=info")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    let config = cli.ingest_config();
    config.validate().context("Invalid run configuration")?;

    let dataset = DatasetConfig::load(&cli.datasets_dir, &cli.dataset)
        .with_context(|| format!("Failed to load dataset '{}'", cli.dataset))?;
    info!(
        dataset = %cli.dataset,
        urls = dataset.download_urls.len(),
        shard_key = %dataset.shard_key,
        "Dataset loaded"
    );

    let store = PgStore::connect(&cli.database_url, config.max_connections())
        .await
        .context("Failed to connect to database")?;
    store.ping().await.context("Database did not answer ping")?;
    info!(max_connections = config.max_connections(), "Database connection pool established");

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let files = if cli.skip_download {
        let dir = config.download_dir.join(&cli.dataset);
        dataset
            .download_urls
            .iter()
            .map(|url| DownloadTask::plan(&dir, url).map(|task| task.result_path))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        let client = reqwest::Client::builder()
            .user_agent(concat!("shardload-ingest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        let manager = DownloadManager::new(
            client,
            DownloadOptions {
                root: config.download_dir.clone(),
                max_parallel: config.max_parallel_downloads,
                tick: config.progress_tick(),
                show_progress: std::io::stderr().is_terminal(),
            },
        );
        manager.download(&cli.dataset, &dataset.download_urls, &cancel).await?
    };

    let counter = IngestCounter::new();
    let reporter_stop = cancel.child_token();
    let reporter = ThroughputReporter::spawn(counter.clone(), config.report_interval(), reporter_stop.clone());

    let registrar = registrar_for(config.registrar, store.pool());
    let loader = BulkLoader::new(
        Arc::new(store),
        registrar,
        LoaderOptions {
            table: config.table_name.clone(),
            shard_key: dataset.shard_key.clone(),
            shard_count: config.shard_count,
            concurrency: config.concurrency,
            on_chunk_error: config.on_chunk_error,
        },
    );
    let mut pipeline = IngestPipeline::new(loader, counter, config.batch_size);

    let result = pipeline.run(&files, &cancel).await;

    reporter_stop.cancel();
    let _ = reporter.await;

    let summary = result?;
    if !summary.skipped_files.is_empty() {
        warn!(files = ?summary.skipped_files, "Some input files were skipped");
    }
    info!(
        files = summary.files_loaded,
        skipped = summary.skipped_files.len(),
        records = summary.records_read,
        committed = summary.rows_committed,
        failed = summary.rows_failed,
        "Done"
    );

    Ok(())
}

/// Cancel `token` on Ctrl+C or SIGTERM
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("Stop requested, cancelling in-flight work");
    token.cancel();
}
