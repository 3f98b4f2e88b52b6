//! Parallel transactional bulk loader
//!
//! Each micro-batch is split into `concurrency` chunks and every chunk is
//! loaded by its own worker in its own transaction through one bulk-copy
//! stream. The coordinator waits for every worker of a batch before it
//! returns, so at most one batch is in flight.
//!
//! # Architecture
//!
//! - **BulkCopyStore** / **CopyTransaction**: transactional bulk-copy capability
//! - **TableStore**: drop-and-recreate of the all-text target table
//! - **ShardRegistrar**: hash-distribution of the table across the cluster
//! - **BulkLoader**: chunking, worker fan-out, barrier, failure policy
//!
//! `postgres` and `registrar` provide the sqlx/Citus implementations.

pub mod postgres;
pub mod registrar;
mod worker;

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::batch::Batch;
use crate::config::ChunkFailurePolicy;
use crate::error::LoadError;
use crate::source::Record;

pub use postgres::PgStore;
pub use registrar::{registrar_for, CitusApi, CitusRegistrar, NoopRegistrar};

/// Transactional bulk-copy capability
#[async_trait]
pub trait BulkCopyStore: Send + Sync + 'static {
    /// Open a new, independent transaction
    async fn begin(&self) -> Result<Box<dyn CopyTransaction>, LoadError>;
}

/// One open transaction owned by one worker
#[async_trait]
pub trait CopyTransaction: Send {
    /// Stream `rows` into `table(columns)` through a single bulk-copy stream
    ///
    /// Opens the stream, submits every row with fields in `columns` order,
    /// finalizes the stream exactly once and closes it. Returns rows written.
    async fn copy_rows(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Record],
    ) -> Result<u64, LoadError>;

    async fn commit(self: Box<Self>) -> Result<(), LoadError>;

    async fn rollback(self: Box<Self>) -> Result<(), LoadError>;
}

/// Materialization of the target table
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Drop `table` if it exists and create it with every column typed as text
    async fn recreate_table(&self, table: &str, columns: &[String]) -> Result<(), LoadError>;
}

/// Assigns a table to the cluster's distributed storage
#[async_trait]
pub trait ShardRegistrar: Send + Sync {
    async fn register_hash_distributed(
        &self,
        table: &str,
        shard_key: &str,
        shard_count: u32,
    ) -> Result<(), LoadError>;
}

/// Static settings for a loader
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub table: String,
    pub shard_key: String,
    pub shard_count: u32,
    pub concurrency: usize,
    pub on_chunk_error: ChunkFailurePolicy,
}

/// Table and column list a chunk is copied into
#[derive(Debug)]
pub(crate) struct LoadTarget {
    pub table: String,
    pub columns: Vec<String>,
}

/// A chunk that failed while the run was allowed to continue
#[derive(Debug)]
pub struct ChunkFailure {
    pub index: usize,
    pub rows: usize,
    pub error: LoadError,
}

/// Result of loading one batch
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub rows_committed: u64,
    pub chunks_committed: usize,
    pub failed_chunks: Vec<ChunkFailure>,
}

impl BatchOutcome {
    pub fn rows_failed(&self) -> usize {
        self.failed_chunks.iter().map(|f| f.rows).sum()
    }
}

/// Coordinates chunk workers against a store
pub struct BulkLoader<S> {
    store: Arc<S>,
    registrar: Arc<dyn ShardRegistrar>,
    options: LoaderOptions,
    target: Option<Arc<LoadTarget>>,
}

impl<S> BulkLoader<S>
where
    S: BulkCopyStore + TableStore,
{
    pub fn new(store: Arc<S>, registrar: Arc<dyn ShardRegistrar>, options: LoaderOptions) -> Self {
        Self {
            store,
            registrar,
            options,
            target: None,
        }
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// Columns of the materialized table, once `prepare_table` has run
    pub fn columns(&self) -> Option<&[String]> {
        self.target.as_deref().map(|t| t.columns.as_slice())
    }

    /// Recreate the target table for `columns` and distribute it
    #[instrument(skip(self, columns), fields(table = %self.options.table))]
    pub async fn prepare_table(&mut self, columns: &[String]) -> Result<(), LoadError> {
        let table = &self.options.table;

        self.store.recreate_table(table, columns).await?;
        self.registrar
            .register_hash_distributed(table, &self.options.shard_key, self.options.shard_count)
            .await?;

        info!(
            columns = columns.len(),
            shard_key = %self.options.shard_key,
            shard_count = self.options.shard_count,
            "Target table ready"
        );

        self.target = Some(Arc::new(LoadTarget {
            table: table.clone(),
            columns: columns.to_vec(),
        }));
        Ok(())
    }

    /// Load one batch and wait for every chunk worker to finish
    ///
    /// Worker failures come back as values. Under [`ChunkFailurePolicy::Abort`]
    /// the first failed chunk is returned as an error once all siblings are done;
    /// under [`ChunkFailurePolicy::Skip`] failures are reported in the outcome.
    pub async fn load_batch(
        &self,
        batch: Batch,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, LoadError> {
        let target = self.target.clone().ok_or_else(|| {
            LoadError::store(
                crate::error::LoadStage::CreateTable,
                "load_batch called before prepare_table",
            )
        })?;

        let batch_len = batch.len();
        let chunks = batch.into_chunks(self.options.concurrency);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();

        let handles: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                let store = Arc::clone(&self.store);
                let target = Arc::clone(&target);
                let cancel = cancel.clone();
                tokio::spawn(worker::load_chunk(store, target, chunk, cancel))
            })
            .collect();

        let joined = futures::future::join_all(handles).await;

        let mut outcome = BatchOutcome::default();
        let mut cancelled = false;

        for (index, joined) in joined.into_iter().enumerate() {
            let result = joined.unwrap_or(Err(LoadError::WorkerPanicked { index }));
            match result {
                Ok(rows) => {
                    outcome.rows_committed += rows;
                    outcome.chunks_committed += 1;
                }
                Err(LoadError::Cancelled) => cancelled = true,
                Err(err) => {
                    error!(chunk = index, rows = sizes[index], error = %err, "Chunk failed to load");
                    outcome.failed_chunks.push(ChunkFailure {
                        index,
                        rows: sizes[index],
                        error: err,
                    });
                }
            }
        }

        if cancelled {
            return Err(LoadError::Cancelled);
        }

        if self.options.on_chunk_error == ChunkFailurePolicy::Abort && !outcome.failed_chunks.is_empty() {
            let first = outcome.failed_chunks.remove(0);
            return Err(LoadError::Chunk {
                index: first.index,
                source: Box::new(first.error),
            });
        }

        debug!(
            rows = batch_len,
            committed = outcome.rows_committed,
            failed_chunks = outcome.failed_chunks.len(),
            "Batch loaded"
        );
        Ok(outcome)
    }
}
