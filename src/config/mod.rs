pub mod cli;

use crate::services::post_processing::{CommandTemplate, TemplateError};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Size of one megabyte as used by `max_size_mb`.
pub const BYTES_PER_MB: u64 = 1 << 20;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("maxSizeMB must be larger than 0")]
    MaxSizeTooSmall,

    #[error("maxSizeMB {0} is too large")]
    MaxSizeTooLarge(u64),

    #[error("Unable to get current work directory: {0}")]
    WorkingDirectory(#[source] std::io::Error),

    #[error("Invalid postProcessing template: {0}")]
    PostProcessing(#[from] TemplateError),

    #[error("postProcessingTimeout must be larger than 0")]
    ZeroTimeout,
}

/// Upload server configuration, fixed for the lifetime of the process
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Address the server binds to (default: 0.0.0.0)
    pub host: IpAddr,

    /// Port the server runs on (default: 8080)
    pub port: u16,

    /// Maximum accepted request body in MB (default: 32)
    pub max_size_mb: u64,

    /// Directory uploaded files are written to (default: working directory)
    pub upload_dir: PathBuf,

    /// Command run for every stored file, `None` disables post processing
    pub post_processing: Option<CommandTemplate>,

    /// Upper bound for a single post processing run
    pub post_processing_timeout: Option<Duration>,

    /// Page served on `GET /` (default: index.html)
    pub index_file: PathBuf,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            max_size_mb: 32,
            upload_dir: PathBuf::from("."),
            post_processing: None,
            post_processing_timeout: None,
            index_file: PathBuf::from("index.html"),
        }
    }
}

impl UploadConfig {
    /// Config writing into `upload_dir` with every other setting at its default
    pub fn for_dir(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size_mb < 1 {
            return Err(ConfigError::MaxSizeTooSmall);
        }
        if self.max_size_mb.checked_mul(BYTES_PER_MB).is_none() {
            return Err(ConfigError::MaxSizeTooLarge(self.max_size_mb));
        }
        if self.post_processing_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Request body ceiling in bytes
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(BYTES_PER_MB)
    }

    /// Body ceiling in the form expected by `DefaultBodyLimit`
    pub fn body_limit(&self) -> usize {
        usize::try_from(self.max_size_bytes()).unwrap_or(usize::MAX)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
