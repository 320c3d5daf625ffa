//! Local destination handling.
//!
//! Destinations are `root/sub_path`. Missing directories are created on
//! demand; an existing non-directory in their place is a
//! [`DownloadError::DestinationConflict`].

use std::io;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{DownloadError, DownloadResult};

/// How an existing destination file is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Append fetched bytes to whatever the file already holds. Nothing is
    /// verified or truncated.
    Append,
    /// Verify the existing file part by part and continue after the last
    /// verified part.
    #[default]
    Resume,
}

impl FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "append" => Ok(Self::Append),
            "resume" => Ok(Self::Resume),
            other => Err(format!("unknown write mode '{}'", other)),
        }
    }
}

/// Make sure `dir` exists and is a directory.
pub async fn ensure_local_dir(dir: &Path) -> DownloadResult<()> {
    match fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(DownloadError::DestinationConflict {
            path: dir.to_path_buf(),
        }),
        Err(_) => {
            debug!(path = %dir.display(), "Creating destination directory");
            fs::create_dir_all(dir)
                .await
                .map_err(|source| create_dir_error(dir, source))
        }
    }
}

// create_dir_all reports a file in the way as AlreadyExists or NotADirectory
// depending on the platform; name the offending component instead.
fn create_dir_error(dir: &Path, source: io::Error) -> DownloadError {
    let conflict = dir
        .ancestors()
        .find(|p| p.exists() && !p.is_dir())
        .map(Path::to_path_buf);
    match conflict {
        Some(path) => DownloadError::DestinationConflict { path },
        None => DownloadError::CreateDirFailed {
            path: dir.to_path_buf(),
            source,
        },
    }
}

/// Resolve the destination path for `sub_path` under `root`.
///
/// Creates `root` and every directory between it and the file. Leading
/// separators in `sub_path` are ignored so the file always lands inside
/// `root`.
pub async fn destination_path(root: &Path, sub_path: &str) -> DownloadResult<PathBuf> {
    ensure_local_dir(root).await?;

    let relative = Path::new(sub_path.trim_start_matches(['/', '\\']));
    if relative
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(DownloadError::DestinationConflict {
            path: root.join(relative),
        });
    }

    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        if parent != root {
            ensure_local_dir(parent).await?;
        }
    }
    Ok(path)
}

/// Length of the file at `path`; a missing file counts as empty.
pub async fn existing_len(path: &Path) -> DownloadResult<u64> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(source) => Err(DownloadError::ReadFailed {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Cut the file at `path` back to `len` bytes.
///
/// Used to drop what a failed append attempt wrote before the next attempt
/// appends the object again.
pub async fn truncate_to(path: &Path, len: u64) -> DownloadResult<()> {
    let write_error = |source| DownloadError::WriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .await
        .map_err(write_error)?;
    file.set_len(len).await.map_err(write_error)?;
    file.sync_all().await.map_err(write_error)?;

    debug!(path = %path.display(), len, "Truncated destination");
    Ok(())
}

/// An open destination file owned by one download attempt.
#[derive(Debug)]
pub struct LocalFile {
    file: File,
    path: PathBuf,
    existed: bool,
    mode: WriteMode,
}

impl LocalFile {
    /// Open `path` according to `mode`.
    ///
    /// `Append` opens for appending and creates the file if missing.
    /// `Resume` reuses an existing file with random access, or creates it.
    pub async fn open(path: &Path, mode: WriteMode) -> DownloadResult<Self> {
        let existed = fs::try_exists(path).await.unwrap_or(false);

        let mut options = OpenOptions::new();
        match mode {
            WriteMode::Append => options.append(true).create(true),
            WriteMode::Resume => options.read(true).write(true).create(true).truncate(false),
        };

        let file = options
            .open(path)
            .await
            .map_err(|source| DownloadError::WriteFailed {
                path: path.to_path_buf(),
                source,
            })?;

        debug!(path = %path.display(), ?mode, existed, "Opened destination");

        Ok(Self {
            file,
            path: path.to_path_buf(),
            existed,
            mode,
        })
    }

    /// Destination path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file was already there before this attempt.
    pub fn existed(&self) -> bool {
        self.existed
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Underlying file handle.
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// Write a chunk at the current position.
    pub async fn write_chunk(&mut self, data: &[u8]) -> DownloadResult<()> {
        self.file
            .write_all(data)
            .await
            .map_err(|source| self.write_error(source))
    }

    /// Flush buffered data and sync it to disk.
    pub async fn sync(&mut self) -> DownloadResult<()> {
        self.file
            .flush()
            .await
            .map_err(|source| self.write_error(source))?;
        self.file
            .sync_all()
            .await
            .map_err(|source| self.write_error(source))
    }

    fn write_error(&self, source: io::Error) -> DownloadError {
        DownloadError::WriteFailed {
            path: self.path.clone(),
            source,
        }
    }
}
