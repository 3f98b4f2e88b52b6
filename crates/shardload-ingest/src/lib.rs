//! Shardload Ingest Library
//!
//! Downloads delimited datasets and bulk-loads them into a hash-distributed
//! Postgres (Citus) table.
//!
//! # Pipeline
//!
//! - **download**: bounded-parallel fetch into `downloads/<dataset>/`, skipping files already present
//! - **extract**: in-place unpacking of `.zip` / `.gz` downloads
//! - **source**: streaming CSV reader with a fixed header
//! - **batch**: micro-batches split into one chunk per loader worker
//! - **loader**: one transaction and one `COPY` stream per chunk, with a barrier per batch
//! - **reporter**: shared record counter and periodic throughput log
//! - **pipeline**: the file-by-file loop tying the above together
//!
//! # Example
//!
//! ```no_run
//! use shardload_ingest::config::{ChunkFailurePolicy, DatasetConfig};
//! use shardload_ingest::loader::{BulkLoader, LoaderOptions, NoopRegistrar, PgStore};
//! use shardload_ingest::pipeline::IngestPipeline;
//! use shardload_ingest::reporter::IngestCounter;
//! use std::path::{Path, PathBuf};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let dataset = DatasetConfig::load(Path::new("./datasets"), "taxi")?;
//!     let store = Arc::new(PgStore::connect("postgresql://localhost/bench", 2).await?);
//!     let loader = BulkLoader::new(
//!         store,
//!         Arc::new(NoopRegistrar),
//!         LoaderOptions {
//!             table: "pg_fancy_bench".to_string(),
//!             shard_key: dataset.shard_key.clone(),
//!             shard_count: 16,
//!             concurrency: 2,
//!             on_chunk_error: ChunkFailurePolicy::Abort,
//!         },
//!     );
//!     let mut pipeline = IngestPipeline::new(loader, IngestCounter::new(), 100_000);
//!     let files = vec![PathBuf::from("downloads/taxi/trips.csv")];
//!     pipeline.run(&files, &CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod batch;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod loader;
pub mod pipeline;
pub mod reporter;
pub mod source;

pub use error::{DownloadError, ExtractError, IngestError, LoadError, SourceError};
