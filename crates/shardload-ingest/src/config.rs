//! Ingestion configuration
//!
//! Two layers: the per-dataset TOML file (`datasets/<name>.toml`) describing
//! where the data lives and how it is sharded, and the run knobs that control
//! parallelism and batching.

use serde::{Deserialize, Serialize};
use shardload_common::{Error, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Run Configuration Constants
// ============================================================================

/// Rows accumulated before a micro-batch is handed to the loader.
pub const DEFAULT_BATCH_SIZE: usize = 100_000;

/// Parallel loader workers (and pooled connections) per batch.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Transfers in flight at once.
pub const DEFAULT_MAX_PARALLEL_DOWNLOADS: usize = 3;

/// Shards created when the table is distributed.
pub const DEFAULT_SHARD_COUNT: u32 = 16;

/// Target table. Fixed per run; concurrent runs against one database race on it.
pub const DEFAULT_TABLE_NAME: &str = "pg_fancy_bench";

pub const DEFAULT_DATASETS_DIR: &str = "./datasets";
pub const DEFAULT_DOWNLOAD_DIR: &str = "./downloads";

/// Throughput sampling interval.
pub const DEFAULT_REPORT_INTERVAL_SECS: u64 = 10;

/// Download status redraw cadence.
pub const DEFAULT_PROGRESS_TICK_MS: u64 = 200;

/// Dataset description loaded from TOML
///
/// ```toml
/// download_urls = ["https://example.org/trips-2016-01.csv.zip"]
/// shard_key = "vendor_id"
/// queries = ["SELECT count(*) FROM pg_fancy_bench"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Source URLs, fetched and loaded in this order
    #[serde(alias = "DownloadURLs")]
    pub download_urls: Vec<String>,

    /// Column the table is hash-distributed on
    #[serde(alias = "ShardKey")]
    pub shard_key: String,

    /// Benchmark queries; carried but not executed by the loader
    #[serde(default, alias = "Queries")]
    pub queries: Vec<String>,
}

impl DatasetConfig {
    /// Load `<datasets_dir>/<name>.toml`
    pub fn load(datasets_dir: &Path, name: &str) -> Result<Self> {
        Self::from_file(&datasets_dir.join(format!("{}.toml", name)))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| Error::ParseConfig {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.download_urls.is_empty() {
            return Err(Error::config("dataset lists no download URLs"));
        }
        if self.shard_key.trim().is_empty() {
            return Err(Error::config("dataset shard key must not be empty"));
        }
        Ok(())
    }
}

/// What to do when one chunk of a batch fails to load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkFailurePolicy {
    /// Finish the batch, then stop the run with the first chunk error
    #[default]
    Abort,
    /// Report the failed chunk and keep loading
    Skip,
}

impl FromStr for ChunkFailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(ChunkFailurePolicy::Abort),
            "skip" | "continue" => Ok(ChunkFailurePolicy::Skip),
            other => Err(Error::config(format!("unknown chunk failure policy '{}'", other))),
        }
    }
}

/// Which shard registration calls to issue after creating the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegistrarKind {
    /// `create_distributed_table(..., shard_count => n)`
    #[default]
    Citus,
    /// `master_create_distributed_table` + `master_create_worker_shards`
    CitusLegacy,
    /// Plain Postgres, no distribution
    None,
}

impl FromStr for RegistrarKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "citus" => Ok(RegistrarKind::Citus),
            "citus-legacy" | "legacy" => Ok(RegistrarKind::CitusLegacy),
            "none" | "postgres" => Ok(RegistrarKind::None),
            other => Err(Error::config(format!("unknown shard registrar '{}'", other))),
        }
    }
}

/// Run knobs for one ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub batch_size: usize,
    pub concurrency: usize,
    pub max_parallel_downloads: usize,
    pub shard_count: u32,
    pub table_name: String,
    pub download_dir: PathBuf,
    pub report_interval_secs: u64,
    pub progress_tick_ms: u64,
    pub on_chunk_error: ChunkFailurePolicy,
    pub registrar: RegistrarKind,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            max_parallel_downloads: DEFAULT_MAX_PARALLEL_DOWNLOADS,
            shard_count: DEFAULT_SHARD_COUNT,
            table_name: DEFAULT_TABLE_NAME.to_string(),
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            report_interval_secs: DEFAULT_REPORT_INTERVAL_SECS,
            progress_tick_ms: DEFAULT_PROGRESS_TICK_MS,
            on_chunk_error: ChunkFailurePolicy::default(),
            registrar: RegistrarKind::default(),
        }
    }
}

impl IngestConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::config("batch size must be greater than 0"));
        }
        if self.concurrency == 0 {
            return Err(Error::config("concurrency must be greater than 0"));
        }
        if self.max_parallel_downloads == 0 {
            return Err(Error::config("max parallel downloads must be greater than 0"));
        }
        if self.shard_count == 0 {
            return Err(Error::config("shard count must be greater than 0"));
        }
        if self.table_name.trim().is_empty() {
            return Err(Error::config("table name must not be empty"));
        }
        if self.report_interval_secs == 0 || self.progress_tick_ms == 0 {
            return Err(Error::config("report interval and progress tick must be non-zero"));
        }
        Ok(())
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms)
    }

    /// Pool size: exactly one connection per concurrent chunk transaction
    pub fn max_connections(&self) -> u32 {
        u32::try_from(self.concurrency).unwrap_or(u32::MAX)
    }
}
