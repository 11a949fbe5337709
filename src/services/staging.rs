//! Local staging area for the upload and download pipelines.
//!
//! Every request gets its own uniquely named directory under the staging
//! root. The directory is a `tempfile::TempDir`, so it is removed when the
//! `StagingDir` drops, whichever way the request exits.

use bytes::Bytes;
use std::{
    fs::File,
    io::{self, Cursor},
    path::{Component, Path, PathBuf},
};
use tempfile::{NamedTempFile, TempDir};
use thiserror::Error;
use tokio::{fs, task};
use tracing::debug;
use zip::{CompressionMethod, ZipArchive, ZipWriter, write::SimpleFileOptions};

/// File extension that marks an upload member as an archive to expand.
pub const ARCHIVE_EXTENSION: &str = ".zip";

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("invalid file name `{0}`")]
    InvalidPath(String),
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("staging task failed: {0}")]
    Join(#[from] task::JoinError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StagingResult<T> = Result<T, StagingError>;

/// Root directory under which per-request staging directories are created.
#[derive(Clone, Debug)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh directory named `<label>-<random suffix>`.
    pub async fn acquire(&self, label: &str) -> StagingResult<StagingDir> {
        fs::create_dir_all(&self.root).await?;
        let root = self.root.clone();
        let prefix = format!("{}-", label);
        let dir = task::spawn_blocking(move || {
            tempfile::Builder::new().prefix(&prefix).tempdir_in(root)
        })
        .await??;
        debug!("acquired staging directory {}", dir.path().display());
        Ok(StagingDir { dir })
    }
}

/// One request's staging directory.
pub struct StagingDir {
    dir: TempDir,
}

impl StagingDir {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write raw bytes at `relative`, creating parent directories.
    pub async fn write_file(&self, relative: &str, bytes: &[u8]) -> StagingResult<PathBuf> {
        let rel = sanitize_relative_path(relative)
            .ok_or_else(|| StagingError::InvalidPath(relative.to_string()))?;
        let target = self.path().join(rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, bytes).await?;
        Ok(target)
    }

    /// Expand a zip archive into the directory, keeping its internal layout.
    /// Entries that would land outside the directory fail the whole archive.
    pub async fn extract_archive(&self, archive: Bytes) -> StagingResult<usize> {
        let dest = self.path().to_path_buf();
        let count = task::spawn_blocking(move || -> StagingResult<usize> {
            let mut zip = ZipArchive::new(Cursor::new(archive))?;
            let count = zip.len();
            zip.extract(&dest)?;
            Ok(count)
        })
        .await??;
        debug!("extracted {} archive entries", count);
        Ok(count)
    }

    /// Every regular file below the directory as `(absolute path, relative
    /// key)`, relative keys `/`-separated and sorted.
    pub async fn files(&self) -> StagingResult<Vec<(PathBuf, String)>> {
        let root = self.path().to_path_buf();
        Ok(task::spawn_blocking(move || collect_files(&root)).await??)
    }

    /// Compress the directory into a zip archive created under `archive_dir`.
    /// The archive lives outside the staging directory so it survives its cleanup.
    pub async fn archive(&self, archive_dir: &Path) -> StagingResult<NamedTempFile> {
        let root = self.path().to_path_buf();
        let archive_dir = archive_dir.to_path_buf();
        let archive = task::spawn_blocking(move || -> StagingResult<NamedTempFile> {
            let files = collect_files(&root)?;
            let archive = tempfile::Builder::new()
                .prefix("download-")
                .suffix(ARCHIVE_EXTENSION)
                .tempfile_in(archive_dir)?;

            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            let mut zip = ZipWriter::new(archive.reopen()?);
            for (path, name) in &files {
                zip.start_file(name.as_str(), options)?;
                io::copy(&mut File::open(path)?, &mut zip)?;
            }
            zip.finish()?;
            Ok(archive)
        })
        .await??;
        Ok(archive)
    }
}

/// Turn a client-supplied file name into a path that stays inside a directory.
///
/// Both `/` and `\` separate components; empty and `.` components are
/// dropped. Returns `None` for `..`, absolute paths, or names with nothing left.
pub fn sanitize_relative_path(name: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for part in name.split(['/', '\\']) {
        if part.is_empty() || part == "." {
            continue;
        }
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(normal)), None) => out.push(normal),
            _ => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

fn collect_files(root: &Path) -> io::Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let relative = path
                    .strip_prefix(root)
                    .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push((path, relative));
            }
        }
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{Read, Write};

    /// Build an in-memory zip with the given `(name, contents)` entries.
    pub(crate) fn zip_bytes(entries: &[(&str, &[u8])]) -> Bytes {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        {
            let mut zip = ZipWriter::new(&mut cursor);
            let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
            for (name, contents) in entries {
                zip.start_file(*name, opts).unwrap();
                zip.write_all(contents).unwrap();
            }
            zip.finish().unwrap();
        }
        Bytes::from(cursor.into_inner())
    }

    #[test]
    fn sanitizes_client_file_names() {
        assert_eq!(
            sanitize_relative_path("scan.png"),
            Some(PathBuf::from("scan.png"))
        );
        assert_eq!(
            sanitize_relative_path("set/./left\\scan.png"),
            Some(PathBuf::from("set/left/scan.png"))
        );
        assert_eq!(
            sanitize_relative_path("/abs/scan.png"),
            Some(PathBuf::from("abs/scan.png"))
        );
        assert_eq!(sanitize_relative_path("../escape.png"), None);
        assert_eq!(sanitize_relative_path("a/../../b"), None);
        assert_eq!(sanitize_relative_path("./"), None);
        assert_eq!(sanitize_relative_path(""), None);
    }

    #[tokio::test]
    async fn directories_are_unique_and_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::new(root.path().join("staging"));

        let first = area.acquire("bob-01-01-2024-00-00-00").await.unwrap();
        let second = area.acquire("bob-01-01-2024-00-00-00").await.unwrap();
        assert_ne!(first.path(), second.path());
        let first_path = first.path().to_path_buf();
        assert!(first_path.exists());

        drop(first);
        assert!(!first_path.exists());
        assert!(second.path().exists());
    }

    #[tokio::test]
    async fn write_extract_and_list() {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::new(root.path());
        let dir = area.acquire("t").await.unwrap();

        dir.write_file("notes.txt", b"n").await.unwrap();
        let archive = zip_bytes(&[("set/a.png", b"a"), ("set/deep/b.png", b"b")]);
        assert_eq!(dir.extract_archive(archive).await.unwrap(), 2);

        let names: Vec<String> = dir
            .files()
            .await
            .unwrap()
            .into_iter()
            .map(|(_, name)| name)
            .collect();
        assert_eq!(names, ["notes.txt", "set/a.png", "set/deep/b.png"]);

        let err = dir.write_file("../x", b"x").await.unwrap_err();
        assert!(matches!(err, StagingError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn rejects_corrupt_archives() {
        let root = tempfile::tempdir().unwrap();
        let dir = StagingArea::new(root.path()).acquire("t").await.unwrap();
        let err = dir
            .extract_archive(Bytes::from_static(b"definitely not a zip"))
            .await
            .unwrap_err();
        assert!(matches!(err, StagingError::Zip(_)));
    }

    #[tokio::test]
    async fn archive_contains_every_staged_file() {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::new(root.path());
        let dir = area.acquire("dl").await.unwrap();
        dir.write_file("bob-1/a.txt", b"alpha").await.unwrap();
        dir.write_file("bob-1/sub/b.txt", b"beta").await.unwrap();

        let archive = dir.archive(area.root()).await.unwrap();
        drop(dir);

        let mut zip = ZipArchive::new(File::open(archive.path()).unwrap()).unwrap();
        assert_eq!(zip.len(), 2);
        let mut contents = String::new();
        zip.by_name("bob-1/sub/b.txt")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "beta");
    }
}
