//! Bounded-parallel dataset download manager
//!
//! Every URL becomes a [`DownloadTask`] under `<root>/<dataset>/`. URLs whose
//! extracted result already exists are skipped, so reruns are idempotent at the
//! file level. The rest are fetched by spawned transfer tasks, at most
//! `max_parallel` at a time. A single coordinator loop reacts to transfer
//! events and the progress tick, plus cancellation. A transfer gets a progress
//! bar once it holds a slot, and archive extraction runs while the loop keeps
//! serving the tick and stop requests.
//!
//! A failed transfer is logged and the run continues; the missing file is
//! reported again when the pipeline tries to open it.

mod progress;
mod task;
mod transfer;

use reqwest::Client;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::{DEFAULT_DOWNLOAD_DIR, DEFAULT_MAX_PARALLEL_DOWNLOADS, DEFAULT_PROGRESS_TICK_MS};
use crate::error::{DownloadError, TransferError};
use crate::extract::{extract_if_archive, partial_path};

pub use progress::ProgressBoard;
pub use task::{DownloadTask, TaskState};
pub use transfer::{fetch, TransferProgress};

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Downloads land in `<root>/<dataset>/`
    pub root: PathBuf,
    pub max_parallel: usize,
    /// Progress redraw cadence
    pub tick: Duration,
    /// Draw progress bars on stderr
    pub show_progress: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            max_parallel: DEFAULT_MAX_PARALLEL_DOWNLOADS,
            tick: Duration::from_millis(DEFAULT_PROGRESS_TICK_MS),
            show_progress: true,
        }
    }
}

/// Final state of every task, in request order
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub tasks: Vec<DownloadTask>,
    /// Most transfers that were running at the same moment
    pub peak_in_flight: usize,
}

impl DownloadReport {
    /// One input path per requested URL, in request order
    pub fn result_paths(&self) -> Vec<PathBuf> {
        self.tasks.iter().map(|t| t.result_path.clone()).collect()
    }

    pub fn count(&self, state: TaskState) -> usize {
        self.tasks.iter().filter(|t| t.state == state).count()
    }
}

/// Messages from transfer tasks to the coordinator
enum TransferEvent {
    /// A permit was acquired and the request is about to be sent
    Started {
        index: usize,
        progress: Arc<TransferProgress>,
    },
    Finished {
        index: usize,
        result: Result<u64, TransferError>,
    },
}

pub struct DownloadManager {
    client: Client,
    options: DownloadOptions,
}

impl DownloadManager {
    pub fn new(client: Client, options: DownloadOptions) -> Self {
        Self { client, options }
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Fetch `urls` for `dataset` and return one local input path per URL
    pub async fn download(
        &self,
        dataset: &str,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>, DownloadError> {
        Ok(self.run(dataset, urls, cancel).await?.result_paths())
    }

    /// Like [`download`](Self::download), returning per-task detail
    #[instrument(skip(self, urls, cancel), fields(urls = urls.len()))]
    pub async fn run(
        &self,
        dataset: &str,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> Result<DownloadReport, DownloadError> {
        let dir = self.options.root.join(dataset);

        let mut tasks = urls
            .iter()
            .map(|url| DownloadTask::plan(&dir, url))
            .collect::<Result<Vec<_>, _>>()?;

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| DownloadError::Directory {
                path: dir.clone(),
                source,
            })?;

        for task in &mut tasks {
            if tokio::fs::try_exists(&task.result_path).await.unwrap_or(false) {
                info!(path = %task.result_path.display(), "Already downloaded, skipping");
                task.state = TaskState::Skipped;
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.options.max_parallel.max(1)));
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<TransferEvent>();
        let mut board = ProgressBoard::new(self.options.show_progress);
        let mut handles: HashMap<usize, JoinHandle<()>> = HashMap::new();

        for (index, task) in tasks.iter().enumerate() {
            if task.state != TaskState::Pending {
                continue;
            }
            let client = self.client.clone();
            let url = task.url.clone();
            let destination = task.destination.clone();
            let semaphore = Arc::clone(&semaphore);
            let events = events_tx.clone();

            handles.insert(
                index,
                tokio::spawn(async move {
                    let permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => {
                            let result = Err(TransferError::Join(e.to_string()));
                            let _ = events.send(TransferEvent::Finished { index, result });
                            return;
                        }
                    };
                    let progress = Arc::new(TransferProgress::default());
                    let _ = events.send(TransferEvent::Started {
                        index,
                        progress: Arc::clone(&progress),
                    });
                    let result = fetch(&client, &url, &destination, &progress).await;
                    // report before releasing the slot so the next Started queues behind it
                    let _ = events.send(TransferEvent::Finished { index, result });
                    drop(permit);
                }),
            );
        }
        drop(events_tx);

        let mut ticker = tokio::time::interval(self.options.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut peak_in_flight = 0;

        while !handles.is_empty() && !cancel.is_cancelled() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events_rx.recv() => match event {
                    Some(TransferEvent::Started { index, progress }) => {
                        board.track(index, tasks[index].file_name(), progress);
                        peak_in_flight = peak_in_flight.max(board.in_flight());
                    }
                    Some(TransferEvent::Finished { index, result }) => {
                        handles.remove(&index);
                        board.finish(index);

                        // extraction can run long; keep serving the tick and stop requests
                        let completion = complete(&mut tasks[index], result);
                        tokio::pin!(completion);
                        loop {
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => break,
                                _ = &mut completion => break,
                                _ = ticker.tick() => board.redraw(),
                            }
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => board.redraw(),
            }
        }
        board.clear();

        if cancel.is_cancelled() {
            abandon(&tasks, handles).await;
            warn!("Downloads cancelled");
            return Err(DownloadError::Cancelled);
        }

        for task in tasks.iter_mut().filter(|t| t.state == TaskState::Pending) {
            error!(url = %task.url, "Transfer task ended without reporting");
            task.state = TaskState::Failed;
        }

        let report = DownloadReport {
            tasks,
            peak_in_flight,
        };
        info!(
            complete = report.count(TaskState::Complete),
            skipped = report.count(TaskState::Skipped),
            failed = report.count(TaskState::Failed),
            peak_in_flight = report.peak_in_flight,
            "Downloads finished"
        );
        Ok(report)
    }
}

async fn complete(task: &mut DownloadTask, result: Result<u64, TransferError>) {
    match result {
        Err(e) => {
            error!(url = %task.url, error = %e, "Download failed");
            task.state = TaskState::Failed;
        }
        Ok(bytes) => {
            task.bytes = bytes;
            info!(path = %task.destination.display(), bytes, "Downloaded");
            if let Err(e) = extract_if_archive(&task.destination).await {
                error!(path = %task.destination.display(), error = %e, "Extraction failed");
            }
            task.state = TaskState::Complete;
        }
    }
}

/// Stop in-flight transfers and remove their partial files
async fn abandon(tasks: &[DownloadTask], handles: HashMap<usize, JoinHandle<()>>) {
    for (index, handle) in handles {
        handle.abort();
        let _ = handle.await;
        let _ = tokio::fs::remove_file(partial_path(&tasks[index].destination)).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn manager(root: &std::path::Path) -> DownloadManager {
        DownloadManager::new(
            Client::new(),
            DownloadOptions {
                root: root.to_path_buf(),
                show_progress: false,
                ..DownloadOptions::default()
            },
        )
    }

    #[tokio::test]
    async fn test_invalid_url_fails_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let urls = vec![
            "http://127.0.0.1:1/ok.csv".to_string(),
            "::not a url::".to_string(),
        ];

        let err = manager(dir.path())
            .download("taxi", &urls, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::InvalidUrl { .. }));
        assert!(!dir.path().join("taxi").exists());
    }

    #[tokio::test]
    async fn test_existing_results_are_skipped_without_requests() {
        let dir = tempfile::tempdir().unwrap();
        let dataset_dir = dir.path().join("taxi");
        std::fs::create_dir_all(&dataset_dir).unwrap();
        std::fs::write(dataset_dir.join("a.csv"), "x\n1\n").unwrap();
        std::fs::write(dataset_dir.join("b.csv"), "x\n2\n").unwrap();

        // port 1 refuses connections; any request would fail the task
        let urls = vec![
            "http://127.0.0.1:1/a.csv".to_string(),
            "http://127.0.0.1:1/b.csv.zip".to_string(),
        ];
        let report = manager(dir.path())
            .run("taxi", &urls, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.count(TaskState::Skipped), 2);
        assert_eq!(
            report.result_paths(),
            vec![dataset_dir.join("a.csv"), dataset_dir.join("b.csv")]
        );
    }

    #[tokio::test]
    async fn test_connection_failure_is_soft() {
        let dir = tempfile::tempdir().unwrap();
        let urls = vec!["http://127.0.0.1:1/gone.csv".to_string()];

        let report = manager(dir.path())
            .run("taxi", &urls, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.count(TaskState::Failed), 1);
        assert_eq!(report.result_paths(), vec![dir.path().join("taxi/gone.csv")]);
        assert!(!dir.path().join("taxi/gone.csv.part").exists());
    }

    #[tokio::test]
    async fn test_empty_url_list() {
        let dir = tempfile::tempdir().unwrap();
        let paths = manager(dir.path())
            .download("taxi", &[], &CancellationToken::new())
            .await
            .unwrap();
        assert!(paths.is_empty());
    }
}
