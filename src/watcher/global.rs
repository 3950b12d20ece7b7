//! The process-wide recursive watcher.
//!
//! One OS watch feeds one intake worker, which filters ignored paths,
//! normalizes renames and fans each event out to the subscribers whose
//! registrations match. Deletions are delivered inline; creations and
//! changes go through the debounce table.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::backend::{NotifyBackend, WatchBackend};
use super::debouncer::{DebounceKey, DebounceTable};
use super::ignore::IgnoreEvaluator;
use super::rlimit::ensure_open_file_limit;
use super::subscriber::WorkspaceSubscriber;
use super::types::path_to_uri;
use super::{FileChangeType, FileEvent, FileEventKind, WatchError};
use crate::config::WatcherConfig;

/// Handle to the shared watcher. Cloning is cheap; all clones drive the
/// same OS watch.
#[derive(Clone)]
pub struct GlobalWatcher {
    shared: Arc<Shared>,
}

struct Shared {
    queue_capacity: usize,
    ignore: Arc<dyn IgnoreEvaluator>,
    backend: Mutex<Box<dyn WatchBackend>>,
    subscribers: DashMap<String, Arc<WorkspaceSubscriber>>,
    debounce: Arc<DebounceTable>,
    root: RwLock<Option<PathBuf>>,
    started: AtomicBool,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl GlobalWatcher {
    /// Watcher over the platform's native backend.
    pub fn new(config: &WatcherConfig, ignore: Arc<dyn IgnoreEvaluator>) -> Self {
        Self::with_backend(config, ignore, NotifyBackend::new())
    }

    pub fn with_backend(
        config: &WatcherConfig,
        ignore: Arc<dyn IgnoreEvaluator>,
        backend: impl WatchBackend + 'static,
    ) -> Self {
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let debounce = Arc::new(DebounceTable::new(
            config.debounce(),
            tracker.clone(),
            cancel.clone(),
        ));

        Self {
            shared: Arc::new(Shared {
                queue_capacity: config.queue_capacity.max(1),
                ignore,
                backend: Mutex::new(Box::new(backend)),
                subscribers: DashMap::new(),
                debounce,
                root: RwLock::new(None),
                started: AtomicBool::new(false),
                cancel,
                tracker,
            }),
        }
    }

    /// Establish the recursive watch and launch the intake worker.
    ///
    /// A second call while started is a no-op. Must be called from within a
    /// tokio runtime.
    pub fn start(&self, root: impl AsRef<Path>) -> Result<(), WatchError> {
        let shared = &self.shared;
        if shared.cancel.is_cancelled() {
            return Err(WatchError::ShutDown);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| WatchError::InitFailed {
            reason: e.to_string(),
        })?;
        if shared
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            crate::debug_event!("watcher", "already started");
            return Ok(());
        }

        ensure_open_file_limit();

        let root = root.as_ref();
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let (tx, rx) = mpsc::channel(shared.queue_capacity);

        if let Err(e) = shared.backend.lock().watch(&root, tx) {
            shared.started.store(false, Ordering::Release);
            tracing::error!("[watcher] failed to watch {}: {e}", root.display());
            return Err(e);
        }
        *shared.root.write() = Some(root.clone());

        let intake = Arc::clone(shared);
        shared
            .tracker
            .spawn_on(intake.run(root.clone(), rx), &runtime);

        crate::log_event!("watcher", "started", "{}", root.display());
        Ok(())
    }

    /// Add or replace the subscriber stored under `name`.
    pub fn register(&self, name: &str, subscriber: Arc<WorkspaceSubscriber>) {
        if self
            .shared
            .subscribers
            .insert(name.to_string(), subscriber)
            .is_some()
        {
            crate::debug_event!("watcher", "replaced subscriber", "{name}");
        } else {
            crate::debug_event!("watcher", "registered subscriber", "{name}");
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.shared.subscribers.remove(name).is_some();
        if removed {
            crate::debug_event!("watcher", "unregistered subscriber", "{name}");
        }
        removed
    }

    /// Stop the OS watch and wait for the intake worker and timers to exit.
    ///
    /// Debounced notifications that have not fired yet are dropped.
    pub async fn shutdown(&self) {
        let shared = &self.shared;
        shared.cancel.cancel();
        // Drops the queue sender; the receiver goes with the intake worker
        shared.backend.lock().stop();

        shared.tracker.close();
        shared.tracker.wait().await;

        if shared.started.swap(false, Ordering::AcqRel) {
            crate::log_event!("watcher", "stopped");
        }
    }

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }

    pub fn root(&self) -> Option<PathBuf> {
        self.shared.root.read().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.len()
    }

    pub fn subscriber(&self, name: &str) -> Option<Arc<WorkspaceSubscriber>> {
        self.shared
            .subscribers
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn pending_debounce_count(&self) -> usize {
        self.shared.debounce.pending_count()
    }

    pub fn debounce_window(&self) -> Duration {
        self.shared.debounce.window()
    }
}

impl Shared {
    async fn run(self: Arc<Self>, root: PathBuf, mut rx: mpsc::Receiver<FileEvent>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => self.handle_event(&root, event).await,
                    None => break,
                },
            }
        }
        crate::debug_event!("watcher", "intake stopped");
    }

    async fn handle_event(self: &Arc<Self>, root: &Path, event: FileEvent) {
        let path = absolutize(root, event.path);
        tracing::trace!("[watcher] {:?} {}", event.kind, path.display());

        if self.ignore.is_ignore_file(&path) {
            self.ignore.invalidate(&path);
        }
        // A rename out of an ignored path can still create a watched file
        let excluded = self.ignore.should_exclude(root, &path);
        if matches!(event.kind, FileEventKind::Remove | FileEventKind::Rename { .. }) {
            self.ignore.forget(&path);
        }
        if excluded && !matches!(&event.kind, FileEventKind::Rename { to: Some(_) }) {
            return;
        }

        match event.kind {
            FileEventKind::Create => self.handle_created(path).await,
            FileEventKind::Write => self.dispatch(&path, FileChangeType::Changed).await,
            FileEventKind::Remove => self.dispatch(&path, FileChangeType::Deleted).await,
            FileEventKind::Rename { to } => {
                if !excluded {
                    self.dispatch(&path, FileChangeType::Deleted).await;
                }

                let Some(to) = to else {
                    return;
                };
                let to = absolutize(root, to);
                if !self.ignore.should_exclude(root, &to) && to.is_file() {
                    self.handle_created(to).await;
                }
            }
        }
    }

    async fn handle_created(self: &Arc<Self>, path: PathBuf) {
        if path.is_dir() {
            return;
        }

        for subscriber in self.snapshot() {
            if !subscriber.client().handles_file(&path) {
                continue;
            }
            let path = path.clone();
            self.tracker.spawn(async move {
                subscriber.open_matching_file(&path).await;
            });
        }

        self.dispatch(&path, FileChangeType::Created).await;
    }

    async fn dispatch(self: &Arc<Self>, path: &Path, change: FileChangeType) {
        // Directories only matter when they go away
        if change != FileChangeType::Deleted && path.is_dir() {
            return;
        }
        let uri = match path_to_uri(path) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!("[watcher] {e}");
                return;
            }
        };

        for subscriber in self.snapshot() {
            if !subscriber.client().handles_file(path) {
                continue;
            }
            let Some(kind) = subscriber.is_path_watched(path) else {
                continue;
            };
            if !kind.contains(change.required_kind()) {
                continue;
            }

            if change == FileChangeType::Deleted {
                for stale in [FileChangeType::Created, FileChangeType::Changed] {
                    self.debounce.cancel(&DebounceKey {
                        uri: uri.clone(),
                        change: stale,
                        subscriber: subscriber.name().to_string(),
                    });
                }
                subscriber.deliver(uri.clone(), path, change).await;
                continue;
            }

            let key = DebounceKey {
                uri: uri.clone(),
                change,
                subscriber: subscriber.name().to_string(),
            };
            let uri = uri.clone();
            let path = path.to_path_buf();
            self.debounce.schedule(key, async move {
                subscriber.deliver(uri, &path, change).await;
            });
        }
    }

    fn snapshot(&self) -> Vec<Arc<WorkspaceSubscriber>> {
        self.subscribers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

fn absolutize(root: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}
