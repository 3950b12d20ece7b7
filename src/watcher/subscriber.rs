//! Per-server subscription to the global watcher.
//!
//! A [`WorkspaceSubscriber`] holds the dynamic watch interest a protocol
//! server registered, decides which events that server should hear about,
//! and forwards them through its [`ProtocolClient`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobBuilder, GlobMatcher};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::client::ProtocolClient;
use super::global::GlobalWatcher;
use super::ignore::{IgnoreEvaluator, NoIgnore};
use super::preload::{PreloadPolicy, open_in_batches, should_exclude_file};
use super::{ChangeEvent, FileChangeType, WatchError, WatchKind, WatchRegistration};

/// Compile a watch glob with LSP semantics: `*` stays within one path
/// component, `**` spans directories, `{a,b}` alternates.
pub fn compile_glob(pattern: &str) -> Result<Glob, WatchError> {
    Ok(GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()?)
}

/// A registration with its glob compiled once.
#[derive(Debug, Clone)]
pub struct CompiledRegistration {
    id: String,
    registration: WatchRegistration,
    /// `None` for a malformed pattern, which never matches.
    matcher: Option<GlobMatcher>,
}

impl CompiledRegistration {
    pub fn try_new(id: impl Into<String>, registration: WatchRegistration) -> Result<Self, WatchError> {
        let matcher = compile_glob(&registration.pattern)?.compile_matcher();
        Ok(Self {
            id: id.into(),
            registration,
            matcher: Some(matcher),
        })
    }

    /// Compile, keeping a malformed pattern as a never-matching entry.
    pub fn new(id: impl Into<String>, registration: WatchRegistration) -> Self {
        let id = id.into();
        match Self::try_new(id.clone(), registration.clone()) {
            Ok(compiled) => compiled,
            Err(e) => {
                tracing::warn!("[watcher] registration '{id}': {e}");
                Self {
                    id,
                    registration,
                    matcher: None,
                }
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn registration(&self) -> &WatchRegistration {
        &self.registration
    }

    /// Match `path` against this registration.
    ///
    /// With a base path, `path` is made relative to it first and a path
    /// outside the base never matches. Without one, both the full path and
    /// the bare file name are tried.
    pub fn matches(&self, path: &Path) -> bool {
        let Some(matcher) = &self.matcher else {
            return false;
        };

        match &self.registration.base_path {
            Some(base) => match path.strip_prefix(base) {
                Ok(relative) => matcher.is_match(relative),
                Err(_) => {
                    tracing::debug!(
                        "[watcher] {} is outside base {} of '{}'",
                        path.display(),
                        base.display(),
                        self.registration.pattern
                    );
                    false
                }
            },
            None => {
                matcher.is_match(path) || path.file_name().is_some_and(|name| matcher.is_match(name))
            }
        }
    }
}

/// One protocol server's subscription.
pub struct WorkspaceSubscriber {
    name: String,
    client: Arc<dyn ProtocolClient>,
    registrations: RwLock<Vec<CompiledRegistration>>,
    root: RwLock<Option<PathBuf>>,
    preload: Arc<PreloadPolicy>,
    ignore: Arc<dyn IgnoreEvaluator>,
    replace_by_id: bool,
    debug: bool,
    /// Stops background preloading when the subscription ends.
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl WorkspaceSubscriber {
    pub fn new(name: impl Into<String>, client: Arc<dyn ProtocolClient>) -> Self {
        Self {
            name: name.into(),
            client,
            registrations: RwLock::new(Vec::new()),
            root: RwLock::new(None),
            preload: Arc::new(PreloadPolicy::default()),
            ignore: Arc::new(NoIgnore),
            replace_by_id: false,
            debug: false,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn with_preload(mut self, preload: Arc<PreloadPolicy>) -> Self {
        self.preload = preload;
        self
    }

    /// Ignore rules used when resolving preload patterns.
    pub fn with_ignore(mut self, ignore: Arc<dyn IgnoreEvaluator>) -> Self {
        self.ignore = ignore;
        self
    }

    pub fn replace_registrations_by_id(mut self, replace: bool) -> Self {
        self.replace_by_id = replace;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &Arc<dyn ProtocolClient> {
        &self.client
    }

    pub fn root(&self) -> Option<PathBuf> {
        self.root.read().clone()
    }

    pub fn set_root(&self, root: impl Into<PathBuf>) {
        *self.root.write() = Some(root.into());
    }

    pub fn registrations(&self) -> Vec<WatchRegistration> {
        self.registrations
            .read()
            .iter()
            .map(|r| r.registration.clone())
            .collect()
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.read().len()
    }

    /// Add registrations received from the server under `id`.
    ///
    /// Registrations accumulate unless replacement by id is enabled, in which
    /// case earlier entries with the same id are swapped out in place.
    /// Servers that need seed files get a preload pass in the background.
    pub fn register(self: &Arc<Self>, id: &str, registrations: Vec<WatchRegistration>) {
        let compiled: Vec<_> = registrations
            .into_iter()
            .map(|r| CompiledRegistration::new(id, r))
            .collect();
        let added = compiled.len();

        {
            let mut current = self.registrations.write();
            let existing = current.iter().position(|r| r.id == id);
            match existing {
                Some(position) if self.replace_by_id => {
                    current.retain(|r| r.id != id);
                    let position = position.min(current.len());
                    current.splice(position..position, compiled);
                }
                _ => current.extend(compiled),
            }
            crate::debug_event!(
                &self.name,
                "registered",
                "{added} watchers under '{id}' ({} total)",
                current.len()
            );
        }

        if self.preload.should_preload(&self.name) {
            self.spawn_preload();
        }
    }

    /// Drop registrations carrying `id`. Only honoured when replacement by
    /// id is enabled; otherwise registrations are kept.
    pub fn unregister_registrations(&self, id: &str) -> usize {
        if !self.replace_by_id {
            crate::debug_event!(&self.name, "unregister ignored", "'{id}'");
            return 0;
        }
        let mut current = self.registrations.write();
        let before = current.len();
        current.retain(|r| r.id != id);
        before - current.len()
    }

    /// Kinds the server wants for `path`, or `None` when nothing matches.
    ///
    /// With no registrations every path is watched for every kind. Otherwise
    /// the first matching registration decides.
    pub fn is_path_watched(&self, path: &Path) -> Option<WatchKind> {
        let registrations = self.registrations.read();
        let kind = if registrations.is_empty() {
            Some(WatchKind::all())
        } else {
            registrations
                .iter()
                .find(|r| r.matches(path))
                .map(|r| r.registration.kind)
        };

        if self.debug {
            crate::debug_event!(&self.name, "match", "{} -> {kind:?}", path.display());
        }
        kind
    }

    /// Offer a newly created file to the server.
    ///
    /// Anchor files are opened right away; other files only for servers that
    /// preload, and only below the smaller preload ceiling.
    pub async fn open_matching_file(&self, path: &Path) {
        if self.client.is_file_open(path) {
            return;
        }
        let config = self.preload.config();
        let high_priority = self
            .root()
            .is_some_and(|root| self.preload.is_high_priority(&self.name, &root, path));

        let max_size = if high_priority {
            config.max_file_size
        } else if self.preload.should_preload(&self.name) {
            config.max_preload_size
        } else {
            return;
        };
        if should_exclude_file(path, max_size) {
            return;
        }

        if let Err(e) = self.client.open_file(path).await {
            tracing::warn!("[{}] failed to open {}: {e:#}", self.name, path.display());
        }
    }

    /// Forward one settled change to the server.
    pub async fn deliver(&self, uri: String, path: &Path, change: FileChangeType) {
        if change == FileChangeType::Deleted {
            self.client.clear_diagnostics(&uri).await;
        }

        if change == FileChangeType::Changed && self.client.is_file_open(path) {
            if let Err(e) = self.client.notify_change(path).await {
                tracing::warn!("[{}] failed to notify change for {uri}: {e:#}", self.name);
            }
            return;
        }

        let event = ChangeEvent { uri, change };
        if let Err(e) = self.client.send_watched_files_changed(vec![event]).await {
            tracing::warn!("[{}] failed to send watched file change: {e:#}", self.name);
        }
    }

    /// Subscribe to `watcher` until `cancel` fires.
    ///
    /// Unregisters when the signal fires or the future is dropped.
    pub async fn watch(self: Arc<Self>, watcher: GlobalWatcher, cancel: CancellationToken, root: PathBuf) {
        self.set_root(root);
        let attached = Attached::new(&watcher, Arc::clone(&self));
        crate::log_event!(&self.name, "watching", "{}", watcher.root().unwrap_or_default().display());

        cancel.cancelled().await;

        drop(attached);
        self.tasks.close();
        self.tasks.wait().await;
        crate::debug_event!(&self.name, "stopped watching");
    }

    fn spawn_preload(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            return;
        }
        let Some(root) = self.root() else {
            crate::debug_event!(&self.name, "preload skipped", "no workspace root yet");
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let subscriber = Arc::clone(self);
        self.tasks.spawn_on(
            async move {
                subscriber.open_high_priority_files(root).await;
            },
            &runtime,
        );
    }

    /// Resolve the server's anchor patterns and open the matches in batches.
    pub async fn open_high_priority_files(&self, root: PathBuf) -> usize {
        let policy = Arc::clone(&self.preload);
        let ignore = Arc::clone(&self.ignore);
        let name = self.name.clone();
        let files =
            match tokio::task::spawn_blocking(move || policy.collect_seed_files(&name, &root, ignore)).await {
                Ok(files) => files,
                Err(e) => {
                    tracing::warn!("[{}] preload scan failed: {e}", self.name);
                    return 0;
                }
            };

        let opened = open_in_batches(
            &self.name,
            self.client.as_ref(),
            &files,
            self.preload.config(),
            &self.cancel,
        )
        .await;
        crate::log_event!(&self.name, "preloaded", "{opened} of {} seed files", files.len());
        opened
    }
}

/// Keeps a subscriber registered with the global watcher while alive.
struct Attached {
    watcher: GlobalWatcher,
    subscriber: Arc<WorkspaceSubscriber>,
}

impl Attached {
    fn new(watcher: &GlobalWatcher, subscriber: Arc<WorkspaceSubscriber>) -> Self {
        watcher.register(subscriber.name(), Arc::clone(&subscriber));
        Self {
            watcher: watcher.clone(),
            subscriber,
        }
    }
}

impl Drop for Attached {
    fn drop(&mut self) {
        self.watcher.unregister(self.subscriber.name());
        self.subscriber.cancel.cancel();
    }
}
