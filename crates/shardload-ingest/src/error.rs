//! Error types for the ingestion pipeline
//!
//! Each stage has its own error so callers can tell a soft failure (one
//! transfer, one extraction, one unreadable input file) from a run-fatal one.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Boxed error returned by store capability implementations
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures of the download manager as a whole
#[derive(Error, Debug)]
pub enum DownloadError {
    /// A URL could not be turned into a request; nothing was fetched
    #[error("Invalid download URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Could not prepare download directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Download cancelled")]
    Cancelled,
}

/// Failure of one transfer. Reported and skipped, never fatal to the run.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server responded with {status}")]
    Status { status: reqwest::StatusCode },

    #[error("Could not write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transfer task failed: {0}")]
    Join(String),
}

/// Failure to unpack a downloaded archive
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Could not extract {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid zip archive {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Extraction task for {path} did not finish: {message}")]
    Join { path: PathBuf, message: String },
}

/// Failures reading one delimited input file
#[derive(Error, Debug)]
pub enum SourceError {
    /// The file is missing or unreadable
    #[error("Could not open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not read header of {path}: {source}")]
    Header {
        path: PathBuf,
        #[source]
        source: csv_async::Error,
    },

    #[error("{path} has no header row")]
    EmptyInput { path: PathBuf },

    #[error("Malformed row in {path} at line {line}: {source}")]
    Parse {
        path: PathBuf,
        line: u64,
        #[source]
        source: csv_async::Error,
    },
}

impl SourceError {
    /// Whether the failure is confined to this file (nothing was consumed)
    pub fn is_unreadable_input(&self) -> bool {
        matches!(self, SourceError::Open { .. } | SourceError::EmptyInput { .. })
    }
}

/// Step of the load protocol at which a store call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Begin,
    OpenCopy,
    SubmitRow,
    FinishCopy,
    Commit,
    Rollback,
    CreateTable,
    RegisterShards,
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self {
            LoadStage::Begin => "open transaction",
            LoadStage::OpenCopy => "prepare COPY",
            LoadStage::SubmitRow => "execute COPY line",
            LoadStage::FinishCopy => "finish COPY",
            LoadStage::Commit => "commit transaction",
            LoadStage::Rollback => "roll back transaction",
            LoadStage::CreateTable => "create table",
            LoadStage::RegisterShards => "distribute table",
        };
        f.write_str(action)
    }
}

/// Failures of the bulk loader
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Could not {stage}: {source}")]
    Store {
        stage: LoadStage,
        #[source]
        source: BoxError,
    },

    #[error("Chunk {index} failed: {source}")]
    Chunk {
        index: usize,
        #[source]
        source: Box<LoadError>,
    },

    #[error("Loader worker for chunk {index} panicked")]
    WorkerPanicked { index: usize },

    /// The chunk was rolled back because a stop was requested
    #[error("Load cancelled before commit")]
    Cancelled,
}

impl LoadError {
    pub fn store(stage: LoadStage, source: impl Into<BoxError>) -> Self {
        LoadError::Store {
            stage,
            source: source.into(),
        }
    }

    /// Stage of the underlying store failure, if any
    pub fn stage(&self) -> Option<LoadStage> {
        match self {
            LoadError::Store { stage, .. } => Some(*stage),
            LoadError::Chunk { source, .. } => source.stage(),
            _ => None,
        }
    }
}

/// Top-level pipeline error
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Load(#[from] LoadError),

    /// A later input file does not match the columns the table was created with
    #[error("Header of {path} ({found:?}) does not match table columns ({expected:?})")]
    HeaderMismatch {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Ingestion cancelled")]
    Cancelled,
}
