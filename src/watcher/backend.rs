//! OS watch backends.
//!
//! The global watcher only needs two capabilities from a backend: start one
//! recursive watch that posts [`FileEvent`]s into a queue, and stop it. Once
//! `stop` returns, the backend must have dropped its queue sender so the
//! intake loop observes the queue closing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{FileEvent, WatchError};

/// Recursive watch capability implemented per platform.
pub trait WatchBackend: Send {
    /// Establish one recursive watch rooted at `root`, posting events to `sink`.
    fn watch(&mut self, root: &Path, sink: mpsc::Sender<FileEvent>) -> Result<(), WatchError>;

    /// Stop watching. No events are posted after this returns.
    fn stop(&mut self);
}

/// Backend over `notify::RecommendedWatcher` (inotify, FSEvents,
/// ReadDirectoryChangesW).
#[derive(Default)]
pub struct NotifyBackend {
    watcher: Option<notify::RecommendedWatcher>,
}

impl NotifyBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WatchBackend for NotifyBackend {
    fn watch(&mut self, root: &Path, sink: mpsc::Sender<FileEvent>) -> Result<(), WatchError> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for file_event in translate(event) {
                    // Blocks the backend thread while the queue is full
                    if sink.blocking_send(file_event).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::error!("[watcher] file watch error: {e}");
            }
        })?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| WatchError::PathWatchFailed {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;

        self.watcher = Some(watcher);
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the watcher joins its event thread and drops the sender
        self.watcher.take();
    }
}

/// Normalize a `notify` event into zero or more [`FileEvent`]s.
///
/// Rename halves are reported separately by most backends: the source half
/// becomes a rename without destination, the target half a creation. The
/// combined `Both` event inotify emits afterwards is dropped so each physical
/// rename is seen once.
pub fn translate(event: Event) -> Vec<FileEvent> {
    let Event { kind, paths, .. } = event;

    match kind {
        EventKind::Create(_) => paths.into_iter().map(FileEvent::create).collect(),
        EventKind::Remove(_) => paths.into_iter().map(FileEvent::remove).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => translate_rename(mode, paths),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => paths.into_iter().map(FileEvent::write).collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

fn translate_rename(mode: RenameMode, paths: Vec<PathBuf>) -> Vec<FileEvent> {
    match mode {
        RenameMode::From => paths
            .into_iter()
            .map(|path| FileEvent::rename(path, None))
            .collect(),
        RenameMode::To => paths.into_iter().map(FileEvent::create).collect(),
        RenameMode::Both => Vec::new(),
        // FSEvents reports each half without saying which one it is
        RenameMode::Any | RenameMode::Other => paths
            .into_iter()
            .map(|path| {
                if path.exists() {
                    FileEvent::create(path)
                } else {
                    FileEvent::rename(path, None)
                }
            })
            .collect(),
    }
}

/// In-process backend fed through a [`ChannelBackendHandle`].
///
/// Used for embedding the watcher where events come from somewhere other
/// than the OS, and for deterministic tests.
#[derive(Default)]
pub struct ChannelBackend {
    sink: Arc<Mutex<Option<mpsc::Sender<FileEvent>>>>,
    refuse: Option<String>,
}

/// Sending side of a [`ChannelBackend`].
#[derive(Clone)]
pub struct ChannelBackendHandle {
    sink: Arc<Mutex<Option<mpsc::Sender<FileEvent>>>>,
}

impl ChannelBackend {
    pub fn new() -> (Self, ChannelBackendHandle) {
        let backend = Self::default();
        let handle = ChannelBackendHandle {
            sink: Arc::clone(&backend.sink),
        };
        (backend, handle)
    }

    /// A backend whose `watch` always fails with `reason`.
    pub fn refusing(reason: impl Into<String>) -> Self {
        Self {
            sink: Arc::default(),
            refuse: Some(reason.into()),
        }
    }
}

impl WatchBackend for ChannelBackend {
    fn watch(&mut self, root: &Path, sink: mpsc::Sender<FileEvent>) -> Result<(), WatchError> {
        if let Some(reason) = &self.refuse {
            return Err(WatchError::PathWatchFailed {
                path: root.to_path_buf(),
                reason: reason.clone(),
            });
        }
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        self.sink.lock().take();
    }
}

impl ChannelBackendHandle {
    /// Post an event. Returns `false` when the watcher is not running.
    pub async fn send(&self, event: FileEvent) -> bool {
        let sink = self.sink.lock().clone();
        match sink {
            Some(sink) => sink.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Whether the backend currently has a live queue.
    pub fn is_attached(&self) -> bool {
        self.sink.lock().is_some()
    }
}
