//! One planned download: URL, destination and terminal state

use reqwest::Url;
use std::path::{Path, PathBuf};

use crate::error::DownloadError;
use crate::extract::strip_archive_suffix;

/// Lifecycle of a [`DownloadTask`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    /// The extracted result already existed; no request was issued
    Skipped,
    Complete,
    /// Transfer failed; the result path will be missing at load time
    Failed,
}

#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub url: Url,
    /// Where the fetched bytes land (`<dir>/<basename>`)
    pub destination: PathBuf,
    /// Input file the record source will open (archive suffix stripped)
    pub result_path: PathBuf,
    pub state: TaskState,
    pub bytes: u64,
}

impl DownloadTask {
    /// Resolve `url` to a destination under `dir`
    ///
    /// Fails for anything a request cannot be built from: unparseable URLs,
    /// non-HTTP schemes, and paths without a usable final segment.
    pub fn plan(dir: &Path, url: &str) -> Result<Self, DownloadError> {
        let invalid = |reason: &str| DownloadError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid("only http and https URLs can be downloaded"));
        }

        let basename = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
            .ok_or_else(|| invalid("URL path has no file name"))?
            .to_string();

        let destination = dir.join(basename);
        let result_path = strip_archive_suffix(&destination);

        Ok(Self {
            url: parsed,
            destination,
            result_path,
            state: TaskState::Pending,
            bytes: 0,
        })
    }

    /// Last path segment, for progress labels
    pub fn file_name(&self) -> String {
        self.destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_archive_url() {
        let task = DownloadTask::plan(
            Path::new("downloads/taxi"),
            "https://example.org/data/trips-2016-01.csv.zip?sig=abc",
        )
        .unwrap();

        assert_eq!(task.destination, PathBuf::from("downloads/taxi/trips-2016-01.csv.zip"));
        assert_eq!(task.result_path, PathBuf::from("downloads/taxi/trips-2016-01.csv"));
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.file_name(), "trips-2016-01.csv.zip");
    }

    #[test]
    fn test_plan_plain_url_keeps_name() {
        let task = DownloadTask::plan(Path::new("d"), "http://example.org/rows.csv").unwrap();
        assert_eq!(task.destination, task.result_path);
    }

    #[test]
    fn test_plan_rejects_unusable_urls() {
        for url in [
            "not a url",
            "ftp://example.org/rows.csv",
            "https://example.org/",
            "https://example.org",
        ] {
            let err = DownloadTask::plan(Path::new("d"), url).unwrap_err();
            assert!(matches!(err, DownloadError::InvalidUrl { .. }), "{url}");
        }
    }
}
