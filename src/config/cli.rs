use super::{ConfigError, UploadConfig};
use crate::services::post_processing::CommandTemplate;
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Minimal multipart file upload server", long_about = None)]
pub struct Args {
    /// Port the server runs on
    #[arg(long, env = "UPLOAD_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Address the server binds to
    #[arg(long, env = "UPLOAD_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Maximum allowed upload size in MB
    #[arg(
        long = "maxSizeMB",
        alias = "max-size-mb",
        env = "UPLOAD_MAX_SIZE_MB",
        default_value_t = 32
    )]
    pub max_size_mb: u64,

    /// Specifies where the files will be uploaded to (default: current directory)
    #[arg(long = "uploadDir", alias = "upload-dir", env = "UPLOAD_DIR")]
    pub upload_dir: Option<PathBuf>,

    /// Post processing executable with parameters, %s is replaced with the uploaded file name
    #[arg(
        long = "postProcessing",
        alias = "post-processing",
        env = "UPLOAD_POST_PROCESSING",
        default_value = ""
    )]
    pub post_processing: String,

    /// Seconds a post processing command may run before it is killed
    #[arg(
        long = "postProcessingTimeout",
        alias = "post-processing-timeout",
        env = "UPLOAD_POST_PROCESSING_TIMEOUT"
    )]
    pub post_processing_timeout: Option<u64>,

    /// Page served on GET /
    #[arg(
        long = "indexFile",
        alias = "index-file",
        env = "UPLOAD_INDEX_FILE",
        default_value = "index.html"
    )]
    pub index_file: PathBuf,
}

impl Args {
    pub fn into_config(self) -> Result<UploadConfig, ConfigError> {
        let upload_dir = match self.upload_dir {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => std::env::current_dir().map_err(ConfigError::WorkingDirectory)?,
        };

        let post_processing = match self.post_processing.trim() {
            "" => None,
            template => Some(CommandTemplate::parse(template)?),
        };

        let config = UploadConfig {
            host: self.host,
            port: self.port,
            max_size_mb: self.max_size_mb,
            upload_dir,
            post_processing,
            post_processing_timeout: self.post_processing_timeout.map(Duration::from_secs),
            index_file: self.index_file,
        };
        config.validate()?;
        Ok(config)
    }
}
