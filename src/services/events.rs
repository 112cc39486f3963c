use crate::services::upload_service::UploadError;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

/// Something that happened while handling an upload
#[derive(Debug)]
pub enum UploadEvent<'a> {
    Processing { filename: &'a str },
    Stored { filename: &'a str, path: &'a Path, bytes: u64 },
    PostProcessed { filename: &'a str, command: &'a str },
    Failed { error: &'a UploadError },
}

impl UploadEvent<'_> {
    pub fn level(&self) -> EventLevel {
        match self {
            UploadEvent::Failed { error } if error.is_client_error() => EventLevel::Warn,
            UploadEvent::Failed { .. } => EventLevel::Error,
            _ => EventLevel::Info,
        }
    }
}

impl fmt::Display for UploadEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadEvent::Processing { filename } => write!(f, "Processing {}", filename),
            UploadEvent::Stored {
                filename,
                path,
                bytes,
            } => write!(f, "Uploaded {} ({} bytes) to {}", filename, bytes, path.display()),
            UploadEvent::PostProcessed { filename, command } => {
                write!(f, "Post processing for {} done: {}", filename, command)
            }
            UploadEvent::Failed { error } => write!(f, "{}", error),
        }
    }
}

/// Sink for upload events, owned by the upload service
pub trait UploadEvents: Send + Sync {
    fn record(&self, event: &UploadEvent<'_>);
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEvents;

impl UploadEvents for TracingEvents {
    fn record(&self, event: &UploadEvent<'_>) {
        match event.level() {
            EventLevel::Info => info!(target: "upload", "{}", event),
            EventLevel::Warn => warn!(target: "upload", "{}", event),
            EventLevel::Error => match event {
                UploadEvent::Failed { error } => match error.command() {
                    Some(command) => error!(target: "upload", command, "{}", event),
                    None => error!(target: "upload", "{}", event),
                },
                _ => error!(target: "upload", "{}", event),
            },
        }
    }
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryEvents {
    entries: Mutex<Vec<(EventLevel, String)>>,
}

impl MemoryEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(EventLevel, String)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn messages(&self, level: EventLevel) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, message)| message)
            .collect()
    }
}

impl UploadEvents for MemoryEvents {
    fn record(&self, event: &UploadEvent<'_>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((event.level(), event.to_string()));
        }
    }
}
