//! Streaming reader over one delimited input file
//!
//! The header row is read eagerly on open; rows are then pulled one at a time.
//! Every row must be exactly as wide as the header.

use csv_async::{AsyncReader, AsyncReaderBuilder};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tracing::debug;

use crate::error::SourceError;

/// One row, positionally aligned with the header
pub type Record = csv_async::StringRecord;

/// Forward-only, non-restartable record stream
pub struct RecordSource {
    path: PathBuf,
    headers: Vec<String>,
    reader: AsyncReader<File>,
}

impl RecordSource {
    /// Open `path` and read its header row
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await.map_err(|source| SourceError::Open {
            path: path.clone(),
            source,
        })?;

        let mut reader = AsyncReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .buffer_capacity(1 << 20)
            .create_reader(file);

        let headers: Vec<String> = reader
            .headers()
            .await
            .map_err(|source| SourceError::Header {
                path: path.clone(),
                source,
            })?
            .iter()
            .map(str::to_string)
            .collect();

        if headers.is_empty() {
            return Err(SourceError::EmptyInput { path });
        }

        debug!(path = %path.display(), columns = headers.len(), "Opened record source");

        Ok(Self {
            path,
            headers,
            reader,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next row, or `None` at end of input
    pub async fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        let mut record = Record::new();
        match self.reader.read_record(&mut record).await {
            Ok(true) => Ok(Some(record)),
            Ok(false) => Ok(None),
            Err(source) => Err(SourceError::Parse {
                path: self.path.clone(),
                line: self.reader.position().line(),
                source,
            }),
        }
    }
}
