//! Data model shared by the watcher, its subscribers and protocol clients.
//!
//! Numeric values follow the Language Server Protocol so registrations and
//! notifications can be forwarded to a server without translation.

use std::path::{Path, PathBuf};

use bitflags::bitflags;
use serde::{Deserialize, Serialize, Serializer};

use super::WatchError;

bitflags! {
    /// Which kinds of change a registration wants to hear about.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct WatchKind: u8 {
        const CREATE = 1;
        const CHANGE = 2;
        const DELETE = 4;
    }
}

impl Default for WatchKind {
    fn default() -> Self {
        WatchKind::all()
    }
}

/// Logical change reported to a protocol server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FileChangeType {
    Created = 1,
    Changed = 2,
    Deleted = 3,
}

impl FileChangeType {
    /// The watch-kind bit a registration must carry to receive this change.
    pub fn required_kind(self) -> WatchKind {
        match self {
            FileChangeType::Created => WatchKind::CREATE,
            FileChangeType::Changed => WatchKind::CHANGE,
            FileChangeType::Deleted => WatchKind::DELETE,
        }
    }
}

impl Serialize for FileChangeType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// Raw event kind as reported by an OS backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEventKind {
    Create,
    Write,
    Remove,
    /// `path` was renamed. `to` is the destination when the backend knows it.
    Rename { to: Option<PathBuf> },
}

/// A single filesystem event, consumed once by the intake loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
}

impl FileEvent {
    pub fn new(path: impl Into<PathBuf>, kind: FileEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    pub fn create(path: impl Into<PathBuf>) -> Self {
        Self::new(path, FileEventKind::Create)
    }

    pub fn write(path: impl Into<PathBuf>) -> Self {
        Self::new(path, FileEventKind::Write)
    }

    pub fn remove(path: impl Into<PathBuf>) -> Self {
        Self::new(path, FileEventKind::Remove)
    }

    pub fn rename(from: impl Into<PathBuf>, to: Option<PathBuf>) -> Self {
        Self::new(from, FileEventKind::Rename { to })
    }
}

/// Outbound `workspace/didChangeWatchedFiles` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub uri: String,
    #[serde(rename = "type")]
    pub change: FileChangeType,
}

/// Interest registered by a protocol server.
///
/// `kind` defaults to every kind when the server does not specify one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchRegistration {
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<PathBuf>,
    #[serde(default)]
    pub kind: WatchKind,
}

impl WatchRegistration {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            base_path: None,
            kind: WatchKind::all(),
        }
    }

    pub fn with_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.base_path = Some(base.into());
        self
    }

    pub fn with_kind(mut self, kind: WatchKind) -> Self {
        self.kind = kind;
        self
    }

    /// Parse an LSP `FileSystemWatcher` object.
    pub fn from_lsp(value: &serde_json::Value) -> Result<Self, WatchError> {
        let watcher: FileSystemWatcher = serde_json::from_value(value.clone()).map_err(|e| {
            WatchError::MalformedRegistration {
                reason: e.to_string(),
            }
        })?;
        watcher.try_into()
    }

    /// Parse `DidChangeWatchedFilesRegistrationOptions` (`{"watchers": [...]}`).
    pub fn from_registration_options(value: &serde_json::Value) -> Result<Vec<Self>, WatchError> {
        let options: RegistrationOptions =
            serde_json::from_value(value.clone()).map_err(|e| {
                WatchError::MalformedRegistration {
                    reason: e.to_string(),
                }
            })?;
        options
            .watchers
            .into_iter()
            .map(WatchRegistration::try_from)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RegistrationOptions {
    watchers: Vec<FileSystemWatcher>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileSystemWatcher {
    glob_pattern: GlobPatternWire,
    #[serde(default)]
    kind: Option<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GlobPatternWire {
    Pattern(String),
    Relative(RelativePatternWire),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelativePatternWire {
    base_uri: BaseUriWire,
    pattern: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BaseUriWire {
    Uri(String),
    WorkspaceFolder { uri: String },
}

impl TryFrom<FileSystemWatcher> for WatchRegistration {
    type Error = WatchError;

    fn try_from(watcher: FileSystemWatcher) -> Result<Self, Self::Error> {
        let kind = match watcher.kind {
            Some(bits) => WatchKind::from_bits(bits).ok_or_else(|| {
                WatchError::MalformedRegistration {
                    reason: format!("unknown watch kind bits {bits}"),
                }
            })?,
            None => WatchKind::all(),
        };

        let registration = match watcher.glob_pattern {
            GlobPatternWire::Pattern(pattern) => WatchRegistration::new(pattern),
            GlobPatternWire::Relative(relative) => {
                let uri = match relative.base_uri {
                    BaseUriWire::Uri(uri) | BaseUriWire::WorkspaceFolder { uri } => uri,
                };
                WatchRegistration::new(relative.pattern).with_base(uri_to_path(&uri)?)
            }
        };

        Ok(registration.with_kind(kind))
    }
}

/// Convert an absolute path to a `file://` URI string.
pub fn path_to_uri(path: &Path) -> Result<String, WatchError> {
    url::Url::from_file_path(path)
        .map(String::from)
        .map_err(|()| WatchError::InvalidUri {
            uri: path.display().to_string(),
            reason: "path is not absolute".to_string(),
        })
}

/// Convert a `file://` URI back to a filesystem path.
pub fn uri_to_path(uri: &str) -> Result<PathBuf, WatchError> {
    let parsed = url::Url::parse(uri).map_err(|e| WatchError::InvalidUri {
        uri: uri.to_string(),
        reason: e.to_string(),
    })?;
    if parsed.scheme() != "file" {
        return Err(WatchError::InvalidUri {
            uri: uri.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    parsed.to_file_path().map_err(|()| WatchError::InvalidUri {
        uri: uri.to_string(),
        reason: "not a local file path".to_string(),
    })
}
