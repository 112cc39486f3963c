use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Prefix of staging files inside the upload directory
pub const STAGING_PREFIX: &str = ".upload-";

#[derive(Error, Debug)]
pub enum CommitError {
    #[error("destination already exists")]
    AlreadyExists,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Bytes of one part, held in a temporary file until the form is complete.
/// Dropping it removes the temporary file.
pub struct StagedFile {
    temp: NamedTempFile,
    writer: tokio::fs::File,
    size: u64,
}

impl StagedFile {
    pub fn new(temp: NamedTempFile) -> io::Result<Self> {
        let writer = tokio::fs::File::from_std(temp.reopen()?);
        Ok(Self {
            temp,
            writer,
            size: 0,
        })
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.writer.write_all(chunk).await?;
        self.size += chunk.len() as u64;
        Ok(())
    }

    /// Waits for every buffered write to reach the file
    pub async fn finish(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }
}

#[async_trait]
pub trait StorageService: Send + Sync {
    /// Whether any entry (file, directory, link) exists under `filename`
    async fn exists(&self, filename: &str) -> io::Result<bool>;

    async fn stage(&self) -> io::Result<StagedFile>;

    /// Moves `staged` to `filename`, failing when the destination exists
    async fn commit(&self, staged: StagedFile, filename: &str) -> Result<PathBuf, CommitError>;
}

/// Stores files in a single flat directory
pub struct LocalStorageService {
    root: PathBuf,
}

impl LocalStorageService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn destination(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }
}

#[async_trait]
impl StorageService for LocalStorageService {
    async fn exists(&self, filename: &str) -> io::Result<bool> {
        match tokio::fs::symlink_metadata(self.destination(filename)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn stage(&self) -> io::Result<StagedFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(STAGING_PREFIX);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Same mode as a plain create, umask still applies
            builder.permissions(std::fs::Permissions::from_mode(0o666));
        }
        StagedFile::new(builder.tempfile_in(&self.root)?)
    }

    async fn commit(&self, staged: StagedFile, filename: &str) -> Result<PathBuf, CommitError> {
        let destination = self.destination(filename);
        let StagedFile { temp, writer, .. } = staged;
        drop(writer);

        let target = destination.clone();
        let persisted = tokio::task::spawn_blocking(move || {
            temp.persist_noclobber(&target).map(|_| ()).map_err(|e| e.error)
        })
        .await
        .map_err(io::Error::other)?;

        match persisted {
            Ok(()) => Ok(destination),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(CommitError::AlreadyExists),
            Err(e) => Err(CommitError::Io(e)),
        }
    }
}
