use crate::config::UploadConfig;
use crate::services::events::{TracingEvents, UploadEvent, UploadEvents};
use crate::services::post_processing::{CommandPostProcessor, PostProcessError, PostProcessor};
use crate::services::storage::{CommitError, LocalStorageService, StagedFile, StorageService};
use crate::utils::validation::{ValidationError, validate_filename};
use axum::http::StatusCode;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use serde::Serialize;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;

/// Why a single file of an upload could not be handled
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Rejected filename {filename:?}: {reason}")]
    InvalidFilename {
        filename: String,
        reason: ValidationError,
    },

    #[error("File already exists {filename}")]
    AlreadyExists { filename: String },

    #[error("Unable to check destination of {filename}: {source}")]
    Stat {
        filename: String,
        #[source]
        source: io::Error,
    },

    #[error("Unable to open staging file for {filename}: {source}")]
    Open {
        filename: String,
        #[source]
        source: io::Error,
    },

    #[error("Unable to copy {filename}: {source}")]
    Copy {
        filename: String,
        #[source]
        source: io::Error,
    },

    #[error("Unable to create file {filename}: {source}")]
    Create {
        filename: String,
        #[source]
        source: io::Error,
    },

    #[error("Error running post processing for {filename}: {source}")]
    PostProcessing {
        filename: String,
        #[source]
        source: PostProcessError,
    },
}

impl UploadError {
    pub fn filename(&self) -> &str {
        match self {
            UploadError::InvalidFilename { filename, .. }
            | UploadError::AlreadyExists { filename }
            | UploadError::Stat { filename, .. }
            | UploadError::Open { filename, .. }
            | UploadError::Copy { filename, .. }
            | UploadError::Create { filename, .. }
            | UploadError::PostProcessing { filename, .. } => filename,
        }
    }

    pub fn kind(&self) -> FileStatus {
        match self {
            UploadError::InvalidFilename { .. } => FileStatus::InvalidFilename,
            UploadError::AlreadyExists { .. } => FileStatus::Conflict,
            UploadError::Stat { .. }
            | UploadError::Open { .. }
            | UploadError::Copy { .. }
            | UploadError::Create { .. } => FileStatus::IoError,
            UploadError::PostProcessing { .. } => FileStatus::PostProcessingError,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.kind().status_code()
    }

    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    /// Message shown to the client, without internal details
    pub fn message(&self) -> String {
        match self {
            UploadError::InvalidFilename { filename, reason } => {
                format!("Invalid filename {:?}: {}", filename, reason.message)
            }
            UploadError::AlreadyExists { filename } => format!("File already exists {}", filename),
            UploadError::Stat { filename, .. } => format!("Error uploading file:{}", filename),
            UploadError::Open { .. } => "Unable to open file".to_string(),
            UploadError::Copy { .. } => "Unable to copy to file".to_string(),
            UploadError::Create { .. } => "Unable to create file".to_string(),
            UploadError::PostProcessing { filename, .. } => {
                format!("Unable to run post processing for {}", filename)
            }
        }
    }

    /// Command line of a failed post processing run
    pub fn command(&self) -> Option<&str> {
        match self {
            UploadError::PostProcessing { source, .. } => Some(source.command()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Created,
    Conflict,
    InvalidFilename,
    IoError,
    PostProcessingError,
}

impl FileStatus {
    pub fn status_code(&self) -> StatusCode {
        match self {
            FileStatus::Created => StatusCode::OK,
            FileStatus::Conflict => StatusCode::CONFLICT,
            FileStatus::InvalidFilename => StatusCode::BAD_REQUEST,
            FileStatus::IoError | FileStatus::PostProcessingError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Outcome for one file of an upload
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FileResult {
    pub filename: String,
    pub status: FileStatus,
    /// Whether the file is on disk under its name
    pub stored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FileResult {
    fn created(filename: String) -> Self {
        Self {
            filename,
            status: FileStatus::Created,
            stored: true,
            message: None,
        }
    }

    fn failed(error: &UploadError, stored: bool) -> Self {
        Self {
            filename: error.filename().to_string(),
            status: error.kind(),
            stored,
            message: Some(error.message()),
        }
    }
}

/// Results of every file in one request, in submission order
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct UploadReport {
    pub files: Vec<FileResult>,
}

impl UploadReport {
    /// `200 OK` when every file was created, otherwise the status of the
    /// last file that failed
    pub fn status(&self) -> StatusCode {
        self.files
            .iter()
            .rev()
            .find(|file| file.status != FileStatus::Created)
            .map(|file| file.status.status_code())
            .unwrap_or(StatusCode::OK)
    }

    pub fn created(&self) -> usize {
        self.files
            .iter()
            .filter(|file| file.status == FileStatus::Created)
            .count()
    }

    /// `Uploaded <name>` for every stored file, followed by the error
    /// message of files that failed
    pub fn to_text(&self) -> String {
        let mut body = String::new();
        for file in &self.files {
            if file.stored {
                body.push_str(&format!("Uploaded {}\n", file.filename));
            }
            if let Some(message) = &file.message {
                body.push_str(message);
                body.push('\n');
            }
        }
        body
    }
}

/// A part that has been read completely, waiting to be committed
pub struct PendingUpload {
    filename: String,
    staged: Result<StagedFile, UploadError>,
}

impl PendingUpload {
    pub fn is_staged(&self) -> bool {
        self.staged.is_ok()
    }
}

/// Handles the files of upload requests
pub struct UploadService {
    storage: Arc<dyn StorageService>,
    post_processor: Option<Arc<dyn PostProcessor>>,
    events: Arc<dyn UploadEvents>,
}

impl UploadService {
    pub fn new(
        storage: Arc<dyn StorageService>,
        post_processor: Option<Arc<dyn PostProcessor>>,
        events: Arc<dyn UploadEvents>,
    ) -> Self {
        Self {
            storage,
            post_processor,
            events,
        }
    }

    /// Local storage in the configured directory, post processing from the
    /// configured template and events sent to `tracing`
    pub fn from_config(config: &UploadConfig) -> Self {
        let post_processor = config.post_processing.clone().map(|template| {
            Arc::new(CommandPostProcessor::new(
                template,
                config.post_processing_timeout,
            )) as Arc<dyn PostProcessor>
        });

        Self::new(
            Arc::new(LocalStorageService::new(config.upload_dir.clone())),
            post_processor,
            Arc::new(TracingEvents),
        )
    }

    pub fn with_events(mut self, events: Arc<dyn UploadEvents>) -> Self {
        self.events = events;
        self
    }

    pub fn has_post_processing(&self) -> bool {
        self.post_processor.is_some()
    }

    /// Validates `filename` and copies `body` into a staging file.
    ///
    /// Only a failure of `body` itself is returned as `Err`: the request can
    /// not be read any further. Everything that concerns this file alone is
    /// kept in the returned [`PendingUpload`].
    pub async fn stage<S, E>(&self, filename: String, body: S) -> Result<PendingUpload, E>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
    {
        self.events.record(&UploadEvent::Processing {
            filename: &filename,
        });

        let staged = match self.check_destination(&filename).await {
            Ok(()) => self.copy_to_staging(&filename, body).await?,
            Err(e) => Err(e),
        };

        Ok(PendingUpload { filename, staged })
    }

    async fn check_destination(&self, filename: &str) -> Result<(), UploadError> {
        validate_filename(filename).map_err(|reason| UploadError::InvalidFilename {
            filename: filename.to_string(),
            reason,
        })?;

        match self.storage.exists(filename).await {
            Ok(false) => Ok(()),
            Ok(true) => Err(UploadError::AlreadyExists {
                filename: filename.to_string(),
            }),
            Err(source) => Err(UploadError::Stat {
                filename: filename.to_string(),
                source,
            }),
        }
    }

    async fn copy_to_staging<S, E>(
        &self,
        filename: &str,
        body: S,
    ) -> Result<Result<StagedFile, UploadError>, E>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
    {
        let mut body = std::pin::pin!(body);

        let mut staged = match self.storage.stage().await {
            Ok(staged) => staged,
            Err(source) => {
                return Ok(Err(UploadError::Open {
                    filename: filename.to_string(),
                    source,
                }));
            }
        };

        while let Some(chunk) = body.try_next().await? {
            if let Err(source) = staged.write_chunk(&chunk).await {
                return Ok(Err(UploadError::Copy {
                    filename: filename.to_string(),
                    source,
                }));
            }
        }

        if let Err(source) = staged.finish().await {
            return Ok(Err(UploadError::Copy {
                filename: filename.to_string(),
                source,
            }));
        }

        Ok(Ok(staged))
    }

    /// Moves every staged file to its destination and runs post processing,
    /// one file after the other
    pub async fn commit(&self, uploads: Vec<PendingUpload>) -> UploadReport {
        let mut report = UploadReport::default();
        for upload in uploads {
            report.files.push(self.commit_one(upload).await);
        }
        report
    }

    async fn commit_one(&self, upload: PendingUpload) -> FileResult {
        let PendingUpload { filename, staged } = upload;

        let stored = match staged {
            Ok(staged) => self.store(&filename, staged).await,
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            self.events.record(&UploadEvent::Failed { error: &e });
            return FileResult::failed(&e, false);
        }

        match self.post_process(&filename).await {
            Ok(()) => FileResult::created(filename),
            Err(e) => {
                self.events.record(&UploadEvent::Failed { error: &e });
                FileResult::failed(&e, true)
            }
        }
    }

    async fn store(&self, filename: &str, staged: StagedFile) -> Result<(), UploadError> {
        let bytes = staged.size();
        match self.storage.commit(staged, filename).await {
            Ok(path) => {
                self.events.record(&UploadEvent::Stored {
                    filename,
                    path: &path,
                    bytes,
                });
                Ok(())
            }
            Err(CommitError::AlreadyExists) => Err(UploadError::AlreadyExists {
                filename: filename.to_string(),
            }),
            Err(CommitError::Io(source)) => Err(UploadError::Create {
                filename: filename.to_string(),
                source,
            }),
        }
    }

    async fn post_process(&self, filename: &str) -> Result<(), UploadError> {
        let Some(processor) = &self.post_processor else {
            return Ok(());
        };

        match processor.process(filename).await {
            Ok(command) => {
                self.events.record(&UploadEvent::PostProcessed {
                    filename,
                    command: &command,
                });
                Ok(())
            }
            Err(source) => Err(UploadError::PostProcessing {
                filename: filename.to_string(),
                source,
            }),
        }
    }
}
