//! In-place extraction of downloaded archives
//!
//! # Supported Formats
//!
//! - **Zip** (.zip): unpacked into the archive's directory; the input file is
//!   expected to be named like the archive without its suffix
//! - **Gzip** (.gz): decompressed to the same path without the suffix
//!
//! Anything else is left untouched. The archive itself is kept, so the
//! download manager's skip check (which looks at the extracted path) is what
//! makes a rerun cheap.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::ExtractError;

/// Archive container recognised by file suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Gzip,
}

impl ArchiveKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if name.ends_with(".gz") {
            Some(ArchiveKind::Gzip)
        } else {
            None
        }
    }

    fn suffix_len(self) -> usize {
        match self {
            ArchiveKind::Zip => ".zip".len(),
            ArchiveKind::Gzip => ".gz".len(),
        }
    }
}

/// Path the input will have once `path` is extracted (unchanged for non-archives)
pub fn strip_archive_suffix(path: &Path) -> PathBuf {
    let Some(kind) = ArchiveKind::from_path(path) else {
        return path.to_path_buf();
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = &name[..name.len() - kind.suffix_len()];
    path.with_file_name(stem)
}

/// Sibling path a file is written to before being renamed into place
pub(crate) fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// Extract `path` in place if its name marks it as an archive
pub async fn extract_if_archive(path: &Path) -> Result<(), ExtractError> {
    let Some(kind) = ArchiveKind::from_path(path) else {
        debug!(path = %path.display(), "Not an archive, nothing to extract");
        return Ok(());
    };

    info!(path = %path.display(), "Extracting archive");

    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || match kind {
        ArchiveKind::Zip => unzip_in_place(&owned),
        ArchiveKind::Gzip => gunzip_in_place(&owned),
    })
    .await
    .map_err(|e| ExtractError::Join {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ExtractError + '_ {
    move |source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn unzip_in_place(path: &Path) -> Result<(), ExtractError> {
    let target_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file = File::open(path).map_err(io_err(path))?;

    let zip_err = |source| ExtractError::Zip {
        path: path.to_path_buf(),
        source,
    };
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(zip_err)?;
    let entries = archive.len();
    archive.extract(target_dir).map_err(zip_err)?;

    debug!(path = %path.display(), entries, "Unzipped archive");
    Ok(())
}

fn gunzip_in_place(path: &Path) -> Result<(), ExtractError> {
    let output = strip_archive_suffix(path);
    let partial = partial_path(&output);

    let input = File::open(path).map_err(io_err(path))?;
    let mut decoder = GzDecoder::new(BufReader::new(input));
    let mut writer = BufWriter::new(File::create(&partial).map_err(io_err(&partial))?);

    let bytes = std::io::copy(&mut decoder, &mut writer).map_err(io_err(path))?;
    writer
        .into_inner()
        .map_err(|e| e.into_error())
        .map_err(io_err(&partial))?;
    std::fs::rename(&partial, &output).map_err(io_err(&output))?;

    debug!(path = %path.display(), output = %output.display(), bytes, "Decompressed gzip file");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    #[test]
    fn test_archive_kind_detection() {
        assert_eq!(ArchiveKind::from_path(Path::new("a/b.csv.zip")), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::from_path(Path::new("b.CSV.GZ")), Some(ArchiveKind::Gzip));
        assert_eq!(ArchiveKind::from_path(Path::new("b.csv")), None);
        assert_eq!(ArchiveKind::from_path(Path::new("zip")), None);
    }

    #[test]
    fn test_strip_archive_suffix() {
        assert_eq!(
            strip_archive_suffix(Path::new("downloads/taxi/trips.csv.zip")),
            PathBuf::from("downloads/taxi/trips.csv")
        );
        assert_eq!(
            strip_archive_suffix(Path::new("downloads/taxi/trips.csv.gz")),
            PathBuf::from("downloads/taxi/trips.csv")
        );
        assert_eq!(
            strip_archive_suffix(Path::new("downloads/taxi/trips.csv")),
            PathBuf::from("downloads/taxi/trips.csv")
        );
    }

    #[tokio::test]
    async fn test_non_archive_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();

        extract_if_archive(&path).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_unzip_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("rows.csv.zip");
        {
            let mut writer = zip::ZipWriter::new(File::create(&archive).unwrap());
            writer.start_file("rows.csv", SimpleFileOptions::default()).unwrap();
            writer.write_all(b"a,b\n1,2\n").unwrap();
            writer.finish().unwrap();
        }

        extract_if_archive(&archive).await.unwrap();

        let extracted = std::fs::read_to_string(dir.path().join("rows.csv")).unwrap();
        assert_eq!(extracted, "a,b\n1,2\n");
        assert!(archive.exists());
    }

    #[tokio::test]
    async fn test_gunzip_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("rows.csv.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"a,b\n3,4\n").unwrap();
        std::fs::write(&archive, encoder.finish().unwrap()).unwrap();

        extract_if_archive(&archive).await.unwrap();

        let extracted = std::fs::read_to_string(dir.path().join("rows.csv")).unwrap();
        assert_eq!(extracted, "a,b\n3,4\n");
        assert!(!dir.path().join("rows.csv.part").exists());
    }

    #[tokio::test]
    async fn test_corrupt_zip_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.csv.zip");
        std::fs::write(&archive, b"definitely not a zip").unwrap();

        let err = extract_if_archive(&archive).await.unwrap_err();
        assert!(matches!(err, ExtractError::Zip { .. }));
    }
}
