//! Protocol client seam used by workspace subscribers.
//!
//! A subscriber never speaks a wire protocol itself; every notification goes
//! through a [`ProtocolClient`] owned by the subscriber's server session.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;

use super::types::{ChangeEvent, path_to_uri, uri_to_path};

/// Calls a subscriber makes against its protocol server connection.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Whether the server is interested in files of this type.
    fn handles_file(&self, path: &Path) -> bool;

    /// Open a file on the server (`textDocument/didOpen`).
    async fn open_file(&self, path: &Path) -> anyhow::Result<()>;

    /// Push the current contents of an open file (`textDocument/didChange`).
    async fn notify_change(&self, path: &Path) -> anyhow::Result<()>;

    fn is_file_open(&self, path: &Path) -> bool;

    /// Forget diagnostics held for a deleted document.
    async fn clear_diagnostics(&self, uri: &str);

    /// Send `workspace/didChangeWatchedFiles`.
    async fn send_watched_files_changed(&self, events: Vec<ChangeEvent>) -> anyhow::Result<()>;
}

/// Suffix rule shared by clients: an empty list accepts every file, otherwise
/// the file name must end with one of the types (leading dot optional,
/// case-insensitive).
pub fn handles_file_type(file_types: &[String], path: &Path) -> bool {
    if file_types.is_empty() {
        return true;
    }
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_ascii_lowercase();

    file_types.iter().any(|file_type| {
        let suffix = file_type.trim_start_matches('.').to_ascii_lowercase();
        !suffix.is_empty() && (name == suffix || name.ends_with(&format!(".{suffix}")))
    })
}

/// LSP language identifier for a path, by extension.
fn language_id(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let id = match ext.as_str() {
        "go" => "go",
        "mod" | "sum" => "go.mod",
        "rs" => "rust",
        "ts" => "typescript",
        "tsx" => "typescriptreact",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "py" | "pyi" => "python",
        "java" => "java",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "json" => "json",
        "toml" => "toml",
        "md" => "markdown",
        other => other,
    };
    id.to_string()
}

/// Client that writes the notifications it would send as JSON lines.
///
/// Used by the `watch` command to make the pipeline observable, and as a
/// reference implementation of the trait.
pub struct JsonLinesClient<W> {
    server: String,
    file_types: Vec<String>,
    writer: Mutex<W>,
    /// Open documents and their current version.
    open: DashMap<PathBuf, i32>,
}

impl<W: Write + Send> JsonLinesClient<W> {
    pub fn new(server: impl Into<String>, file_types: Vec<String>, writer: W) -> Self {
        Self {
            server: server.into(),
            file_types,
            writer: Mutex::new(writer),
            open: DashMap::new(),
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    fn emit(&self, method: &str, params: serde_json::Value) -> anyhow::Result<()> {
        let message = json!({
            "server": self.server,
            "method": method,
            "params": params,
        });
        // One write per line so clients sharing a stream never interleave
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');

        let mut writer = self.writer.lock();
        writer.write_all(&line)?;
        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl<W: Write + Send> ProtocolClient for JsonLinesClient<W> {
    fn handles_file(&self, path: &Path) -> bool {
        handles_file_type(&self.file_types, path)
    }

    async fn open_file(&self, path: &Path) -> anyhow::Result<()> {
        if self.open.contains_key(path) {
            return Ok(());
        }
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let uri = path_to_uri(path)?;

        self.emit(
            "textDocument/didOpen",
            json!({
                "textDocument": {
                    "uri": uri,
                    "languageId": language_id(path),
                    "version": 1,
                    "text": text,
                }
            }),
        )?;
        self.open.insert(path.to_path_buf(), 1);
        Ok(())
    }

    async fn notify_change(&self, path: &Path) -> anyhow::Result<()> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let uri = path_to_uri(path)?;

        let version = {
            let mut entry = self.open.entry(path.to_path_buf()).or_insert(0);
            *entry += 1;
            *entry
        };

        self.emit(
            "textDocument/didChange",
            json!({
                "textDocument": { "uri": uri, "version": version },
                "contentChanges": [{ "text": text }],
            }),
        )
    }

    fn is_file_open(&self, path: &Path) -> bool {
        self.open.contains_key(path)
    }

    async fn clear_diagnostics(&self, uri: &str) {
        if let Ok(path) = uri_to_path(uri) {
            self.open.remove(&path);
        }
        crate::debug_event!(&self.server, "diagnostics cleared", "{uri}");
    }

    async fn send_watched_files_changed(&self, events: Vec<ChangeEvent>) -> anyhow::Result<()> {
        self.emit(
            "workspace/didChangeWatchedFiles",
            json!({ "changes": events }),
        )
    }
}
