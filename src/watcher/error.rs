//! Error types for the shared watcher.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from watcher operations.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("File system event error: {details}")]
    EventError { details: String },

    #[error("Invalid glob pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("Malformed watch registration: {reason}")]
    MalformedRegistration { reason: String },

    #[error("Watcher has been shut down")]
    ShutDown,
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        match e.paths.first() {
            Some(path) => WatchError::PathWatchFailed {
                path: path.clone(),
                reason: describe(&e.kind),
            },
            None => WatchError::InitFailed {
                reason: describe(&e.kind),
            },
        }
    }
}

fn describe(kind: &notify::ErrorKind) -> String {
    match kind {
        notify::ErrorKind::Io(io) => io.to_string(),
        notify::ErrorKind::PathNotFound => "path not found".to_string(),
        notify::ErrorKind::MaxFilesWatch => {
            "OS watch limit reached (raise fs.inotify.max_user_watches)".to_string()
        }
        notify::ErrorKind::Generic(msg) => msg.clone(),
        other => format!("{other:?}"),
    }
}

impl From<globset::Error> for WatchError {
    fn from(e: globset::Error) -> Self {
        WatchError::InvalidPattern {
            pattern: e.glob().unwrap_or_default().to_string(),
            reason: e.kind().to_string(),
        }
    }
}
