//! Streaming one HTTP body to disk

use futures::StreamExt;
use reqwest::{Client, Url};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::TransferError;
use crate::extract::partial_path;

/// Byte counters shared between a transfer task and the progress display
#[derive(Debug, Default)]
pub struct TransferProgress {
    transferred: AtomicU64,
    total: AtomicU64,
}

impl TransferProgress {
    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    /// Expected size, or 0 when the server sent no length
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Percent complete in [0, 100]; 0 while the size is unknown
    pub fn percent(&self) -> u64 {
        let total = self.total();
        if total == 0 {
            return 0;
        }
        (self.transferred().saturating_mul(100) / total).min(100)
    }

    fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    fn add(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// Fetch `url` into `destination`
///
/// The body is written to a `.part` sibling and renamed into place only once
/// fully received, so an interrupted transfer never looks complete.
pub async fn fetch(
    client: &Client,
    url: &Url,
    destination: &Path,
    progress: &TransferProgress,
) -> Result<u64, TransferError> {
    let partial = partial_path(destination);

    match stream_to(client, url, &partial, progress).await {
        Ok(bytes) => {
            tokio::fs::rename(&partial, destination)
                .await
                .map_err(|source| TransferError::Io {
                    path: destination.to_path_buf(),
                    source,
                })?;
            debug!(url = %url, bytes, "Transfer finished");
            Ok(bytes)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial).await;
            Err(e)
        }
    }
}

async fn stream_to(
    client: &Client,
    url: &Url,
    partial: &Path,
    progress: &TransferProgress,
) -> Result<u64, TransferError> {
    let response = client.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(TransferError::Status { status });
    }
    if let Some(len) = response.content_length() {
        progress.set_total(len);
    }

    let io_err = |source| TransferError::Io {
        path: partial.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::create(partial).await.map_err(io_err)?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;
        progress.add(chunk.len() as u64);
    }

    file.flush().await.map_err(io_err)?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        let progress = TransferProgress::default();
        assert_eq!(progress.percent(), 0);

        progress.set_total(200);
        progress.add(50);
        assert_eq!(progress.percent(), 25);

        progress.add(500);
        assert_eq!(progress.percent(), 100);
    }
}
