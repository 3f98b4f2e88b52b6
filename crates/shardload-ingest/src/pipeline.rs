//! File-by-file ingestion loop
//!
//! Reads each input file, accumulates its rows into micro-batches and drains
//! every full batch through the [`BulkLoader`]. The target table is created from
//! the first readable file's header; every later file must carry the same header.

use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::batch::Batch;
use crate::error::{IngestError, LoadError};
use crate::loader::{BulkCopyStore, BulkLoader, TableStore};
use crate::reporter::IngestCounter;
use crate::source::RecordSource;

/// Totals for one run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub files_loaded: usize,
    /// Inputs that were missing or unreadable and contributed no rows
    pub skipped_files: Vec<PathBuf>,
    pub records_read: u64,
    pub rows_committed: u64,
    /// Rows in chunks that failed under the skip policy
    pub rows_failed: u64,
    pub failed_chunks: usize,
    pub batches: u64,
}

pub struct IngestPipeline<S> {
    loader: BulkLoader<S>,
    counter: IngestCounter,
    batch_size: usize,
}

impl<S> IngestPipeline<S>
where
    S: BulkCopyStore + TableStore,
{
    pub fn new(loader: BulkLoader<S>, counter: IngestCounter, batch_size: usize) -> Self {
        Self {
            loader,
            counter,
            batch_size,
        }
    }

    pub fn loader(&self) -> &BulkLoader<S> {
        &self.loader
    }

    /// Load every file in order
    #[instrument(skip_all, fields(files = files.len()))]
    pub async fn run(
        &mut self,
        files: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Result<IngestSummary, IngestError> {
        let mut summary = IngestSummary::default();

        for path in files {
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }

            let mut source = match RecordSource::open(path).await {
                Ok(source) => source,
                Err(e) if e.is_unreadable_input() => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable input file");
                    summary.skipped_files.push(path.clone());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            self.ensure_table(path, source.headers()).await?;

            info!(path = %path.display(), "Loading file");
            self.load_file(&mut source, &mut summary, cancel).await?;
            summary.files_loaded += 1;
        }

        Ok(summary)
    }

    async fn ensure_table(&mut self, path: &Path, headers: &[String]) -> Result<(), IngestError> {
        if let Some(columns) = self.loader.columns() {
            if columns != headers {
                return Err(IngestError::HeaderMismatch {
                    path: path.to_path_buf(),
                    expected: columns.to_vec(),
                    found: headers.to_vec(),
                });
            }
            return Ok(());
        }
        self.loader.prepare_table(headers).await.map_err(load_error)
    }

    async fn load_file(
        &self,
        source: &mut RecordSource,
        summary: &mut IngestSummary,
        cancel: &CancellationToken,
    ) -> Result<(), IngestError> {
        let mut batch = Batch::new(self.batch_size);

        while let Some(record) = source.next_record().await? {
            self.counter.increment();
            summary.records_read += 1;
            batch.push(record);

            if batch.is_full() {
                self.drain(batch.take(), summary, cancel).await?;
            }
        }

        if !batch.is_empty() {
            self.drain(batch, summary, cancel).await?;
        }
        Ok(())
    }

    async fn drain(
        &self,
        batch: Batch,
        summary: &mut IngestSummary,
        cancel: &CancellationToken,
    ) -> Result<(), IngestError> {
        let rows = batch.len();
        let outcome = self
            .loader
            .load_batch(batch, cancel)
            .await
            .map_err(load_error)?;

        summary.batches += 1;
        summary.rows_committed += outcome.rows_committed;
        summary.rows_failed += outcome.rows_failed() as u64;
        summary.failed_chunks += outcome.failed_chunks.len();

        debug!(batch = summary.batches, rows, committed = outcome.rows_committed, "Batch drained");
        Ok(())
    }
}

fn load_error(e: LoadError) -> IngestError {
    match e {
        LoadError::Cancelled => IngestError::Cancelled,
        other => IngestError::Load(other),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ChunkFailurePolicy;
    use crate::loader::testing::{self, Event, RecordingStore};
    use std::sync::Arc;

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn pipeline(
        store: RecordingStore,
        batch_size: usize,
        policy: ChunkFailurePolicy,
    ) -> (Arc<RecordingStore>, IngestCounter, IngestPipeline<RecordingStore>) {
        let (store, loader) = testing::loader(store, testing::options(2, policy));
        let counter = IngestCounter::new();
        (store, counter.clone(), IngestPipeline::new(loader, counter, batch_size))
    }

    #[tokio::test]
    async fn test_loads_all_rows_in_batches() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(&dir, "rows.csv", "a,b\n1,2\n3,4\n5,6\n7,8\n9,10\n");
        let (store, counter, mut pipeline) =
            pipeline(RecordingStore::default(), 2, ChunkFailurePolicy::Abort);

        let summary = pipeline.run(&[file], &CancellationToken::new()).await.unwrap();

        assert_eq!(summary.files_loaded, 1);
        assert_eq!(summary.records_read, 5);
        assert_eq!(summary.rows_committed, 5);
        assert_eq!(summary.batches, 3);
        assert_eq!(counter.get(), 5);
        assert_eq!(store.copied_rows().len(), 5);

        let recreated = store
            .events()
            .iter()
            .filter(|e| matches!(e, Event::Recreate { .. }))
            .count();
        assert_eq!(recreated, 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("failed-download.csv");
        let present = write(&dir, "ok.csv", "a,b\n1,2\n");
        let (_, _, mut pipeline) = pipeline(RecordingStore::default(), 10, ChunkFailurePolicy::Abort);

        let summary = pipeline
            .run(&[missing.clone(), present], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.skipped_files, vec![missing]);
        assert_eq!(summary.files_loaded, 1);
        assert_eq!(summary.rows_committed, 1);
    }

    #[tokio::test]
    async fn test_header_mismatch_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let first = write(&dir, "one.csv", "a,b\n1,2\n");
        let second = write(&dir, "two.csv", "a,c\n3,4\n");
        let (_, _, mut pipeline) = pipeline(RecordingStore::default(), 10, ChunkFailurePolicy::Abort);

        let err = pipeline
            .run(&[first, second], &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::HeaderMismatch { .. }));
    }

    #[tokio::test]
    async fn test_parse_error_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(&dir, "ragged.csv", "a,b\n1,2\n3\n");
        let (_, _, mut pipeline) = pipeline(RecordingStore::default(), 10, ChunkFailurePolicy::Abort);

        let err = pipeline.run(&[file], &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::Source(_)));
    }

    #[tokio::test]
    async fn test_skip_policy_counts_failed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(&dir, "rows.csv", "a,b\nbad,1\nok,2\n");
        let store = RecordingStore {
            fail_on_key: Some("bad".to_string()),
            ..Default::default()
        };
        let (_, _, mut pipeline) = pipeline(store, 10, ChunkFailurePolicy::Skip);

        let summary = pipeline.run(&[file], &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.rows_committed, 1);
        assert_eq!(summary.rows_failed, 1);
        assert_eq!(summary.failed_chunks, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(&dir, "rows.csv", "a,b\n1,2\n");
        let (store, _, mut pipeline) = pipeline(RecordingStore::default(), 10, ChunkFailurePolicy::Abort);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pipeline.run(&[file], &cancel).await.unwrap_err();

        assert!(matches!(err, IngestError::Cancelled));
        assert!(store.events().is_empty());
    }
}
