//! End-to-end tests of the intake, matching and debounce pipeline.
//!
//! Events are fed through a `ChannelBackend` and time is paused, so debounce
//! windows are exercised deterministically.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use tidewatch::config::WatcherConfig;
use tidewatch::watcher::{
    ChangeEvent, ChannelBackend, ChannelBackendHandle, FileChangeType, FileEvent,
    GitignoreEvaluator, GlobalWatcher, IgnoreEvaluator, NoIgnore, ProtocolClient, WatchKind,
    WatchRegistration, WorkspaceSubscriber, handles_file_type, path_to_uri,
};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Open(PathBuf),
    Change(PathBuf),
    Clear(String),
    Watched(Vec<ChangeEvent>),
}

#[derive(Default)]
struct RecordingClient {
    file_types: Vec<String>,
    calls: Mutex<Vec<Call>>,
    open: Mutex<HashSet<PathBuf>>,
}

impl RecordingClient {
    fn for_types(types: &[&str]) -> Self {
        Self {
            file_types: types.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn watched(&self) -> Vec<ChangeEvent> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Watched(events) => Some(events),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn mark_open(&self, path: &Path) {
        self.open.lock().insert(path.to_path_buf());
    }
}

#[async_trait]
impl ProtocolClient for RecordingClient {
    fn handles_file(&self, path: &Path) -> bool {
        handles_file_type(&self.file_types, path)
    }

    async fn open_file(&self, path: &Path) -> anyhow::Result<()> {
        self.calls.lock().push(Call::Open(path.to_path_buf()));
        self.mark_open(path);
        Ok(())
    }

    async fn notify_change(&self, path: &Path) -> anyhow::Result<()> {
        self.calls.lock().push(Call::Change(path.to_path_buf()));
        Ok(())
    }

    fn is_file_open(&self, path: &Path) -> bool {
        self.open.lock().contains(path)
    }

    async fn clear_diagnostics(&self, uri: &str) {
        self.calls.lock().push(Call::Clear(uri.to_string()));
    }

    async fn send_watched_files_changed(&self, events: Vec<ChangeEvent>) -> anyhow::Result<()> {
        self.calls.lock().push(Call::Watched(events));
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    root: PathBuf,
    watcher: GlobalWatcher,
    handle: ChannelBackendHandle,
}

impl Harness {
    fn new() -> Self {
        Self::with_ignore(Arc::new(NoIgnore))
    }

    fn with_ignore(ignore: Arc<dyn IgnoreEvaluator>) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let (backend, handle) = ChannelBackend::new();
        let watcher = GlobalWatcher::with_backend(&WatcherConfig::default(), ignore, backend);
        watcher.start(&root).unwrap();

        Self {
            _dir: dir,
            root,
            watcher,
            handle,
        }
    }

    fn attach(&self, name: &str, client: Arc<RecordingClient>) -> Arc<WorkspaceSubscriber> {
        let subscriber = Arc::new(WorkspaceSubscriber::new(name, client));
        self.watcher.register(name, Arc::clone(&subscriber));
        subscriber
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    fn touch(&self, rel: &str) -> PathBuf {
        let path = self.path(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "x").unwrap();
        path
    }

    async fn send(&self, event: FileEvent) {
        assert!(self.handle.send(event).await);
    }
}

fn uri(path: &Path) -> String {
    path_to_uri(path).unwrap()
}

fn change(path: &Path, change: FileChangeType) -> ChangeEvent {
    ChangeEvent {
        uri: uri(path),
        change,
    }
}

/// Let the intake worker drain without reaching a debounce deadline.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

async fn past_window() {
    tokio::time::sleep(Duration::from_millis(400)).await;
}

#[tokio::test(start_paused = true)]
async fn test_double_start_dispatches_once() {
    let h = Harness::new();
    h.watcher.start(&h.root).unwrap();

    let client = Arc::new(RecordingClient::default());
    h.attach("gopls", client.clone());

    let file = h.touch("a.go");
    h.send(FileEvent::write(&file)).await;
    past_window().await;

    assert_eq!(client.watched(), vec![change(&file, FileChangeType::Changed)]);
    h.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_writes_coalesces() {
    let h = Harness::new();
    let client = Arc::new(RecordingClient::default());
    h.attach("gopls", client.clone());

    let file = h.touch("a.go");
    for _ in 0..5 {
        h.send(FileEvent::write(&file)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(h.watcher.pending_debounce_count(), 1);
    past_window().await;

    assert_eq!(client.watched().len(), 1);
    assert_eq!(h.watcher.pending_debounce_count(), 0);
    h.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_window_measured_from_last_write() {
    let h = Harness::new();
    let client = Arc::new(RecordingClient::default());
    h.attach("gopls", client.clone());

    let file = h.touch("a.go");
    h.send(FileEvent::write(&file)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.send(FileEvent::write(&file)).await;

    // 310ms after the first write, 260ms after the second
    tokio::time::sleep(Duration::from_millis(260)).await;
    assert!(client.watched().is_empty());

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(client.watched().len(), 1);
    h.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_zero_registrations_receive_everything() {
    let h = Harness::new();
    let client = Arc::new(RecordingClient::default());
    h.attach("generic", client.clone());

    let readme = h.touch("README.md");
    let nested = h.touch("deep/er/notes.txt");
    h.send(FileEvent::write(&readme)).await;
    h.send(FileEvent::write(&nested)).await;
    past_window().await;

    let uris: HashSet<_> = client.watched().into_iter().map(|e| e.uri).collect();
    assert_eq!(uris, HashSet::from([uri(&readme), uri(&nested)]));
    h.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_gopls_scenario() {
    let h = Harness::new();
    let client = Arc::new(RecordingClient::default());
    let gopls = h.attach("gopls", client.clone());
    gopls.register("1", vec![WatchRegistration::new("**/*.go")]);

    let go_file = h.touch("internal/x.go");
    let readme = h.touch("README.md");
    h.send(FileEvent::write(&go_file)).await;
    h.send(FileEvent::write(&readme)).await;
    past_window().await;

    assert_eq!(client.watched(), vec![change(&go_file, FileChangeType::Changed)]);
    h.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_base_path_mismatch_never_matches() {
    let h = Harness::new();
    let client = Arc::new(RecordingClient::default());
    let sub = h.attach("gopls", client.clone());
    sub.register(
        "1",
        vec![WatchRegistration::new("**/*.go").with_base(h.path("svc"))],
    );

    let outside = h.touch("other/x.go");
    let inside = h.touch("svc/api/x.go");
    h.send(FileEvent::write(&outside)).await;
    h.send(FileEvent::write(&inside)).await;
    past_window().await;

    assert_eq!(client.watched(), vec![change(&inside, FileChangeType::Changed)]);
    h.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_required_kind_bit_filters() {
    let h = Harness::new();
    let client = Arc::new(RecordingClient::default());
    let sub = h.attach("gopls", client.clone());
    sub.register(
        "1",
        vec![WatchRegistration::new("**/*.go").with_kind(WatchKind::CREATE | WatchKind::DELETE)],
    );

    let file = h.touch("a.go");
    h.send(FileEvent::write(&file)).await;
    past_window().await;
    assert!(client.watched().is_empty());

    h.send(FileEvent::create(&file)).await;
    past_window().await;
    assert_eq!(client.watched(), vec![change(&file, FileChangeType::Created)]);
    h.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_delete_is_immediate() {
    let h = Harness::new();
    let client = Arc::new(RecordingClient::default());
    h.attach("gopls", client.clone());

    let gone = h.path("gone.go");
    h.send(FileEvent::remove(&gone)).await;
    settle().await;

    assert_eq!(
        client.calls(),
        vec![
            Call::Clear(uri(&gone)),
            Call::Watched(vec![change(&gone, FileChangeType::Deleted)]),
        ]
    );
    h.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_delete_cancels_pending_change() {
    let h = Harness::new();
    let client = Arc::new(RecordingClient::default());
    h.attach("gopls", client.clone());

    let file = h.touch("a.go");
    h.send(FileEvent::write(&file)).await;
    settle().await;
    std::fs::remove_file(&file).unwrap();
    h.send(FileEvent::remove(&file)).await;
    past_window().await;

    assert_eq!(client.watched(), vec![change(&file, FileChangeType::Deleted)]);
    h.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rename_to_file() {
    let h = Harness::new();
    let client = Arc::new(RecordingClient::default());
    h.attach("gopls", client.clone());

    let from = h.path("a.go");
    let to = h.touch("b.go");
    h.send(FileEvent::rename(&from, Some(to.clone()))).await;
    settle().await;

    assert_eq!(client.watched(), vec![change(&from, FileChangeType::Deleted)]);

    past_window().await;
    assert_eq!(
        client.watched(),
        vec![
            change(&from, FileChangeType::Deleted),
            change(&to, FileChangeType::Created),
        ]
    );
    h.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rename_to_directory_only_deletes() {
    let h = Harness::new();
    let client = Arc::new(RecordingClient::default());
    h.attach("gopls", client.clone());

    let from = h.path("pkg");
    let to = h.path("pkg2");
    std::fs::create_dir_all(&to).unwrap();
    h.send(FileEvent::rename(&from, Some(to))).await;
    past_window().await;

    assert_eq!(client.watched(), vec![change(&from, FileChangeType::Deleted)]);
    h.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rename_without_destination_is_delete() {
    let h = Harness::new();
    let client = Arc::new(RecordingClient::default());
    h.attach("gopls", client.clone());

    let from = h.path("a.go");
    h.send(FileEvent::rename(&from, None)).await;
    past_window().await;

    assert_eq!(client.watched(), vec![change(&from, FileChangeType::Deleted)]);
    h.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_directory_create_not_forwarded() {
    let h = Harness::new();
    let client = Arc::new(RecordingClient::default());
    h.attach("gopls", client.clone());

    let dir = h.path("newpkg");
    std::fs::create_dir_all(&dir).unwrap();
    h.send(FileEvent::create(&dir)).await;
    h.send(FileEvent::write(&dir)).await;
    let file = h.touch("newpkg/a.go");
    h.send(FileEvent::create(&file)).await;
    past_window().await;

    assert_eq!(client.watched(), vec![change(&file, FileChangeType::Created)]);
    h.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_ignored_subtree_never_reaches_subscribers() {
    let h = Harness::with_ignore(Arc::new(GitignoreEvaluator::new()));
    std::fs::write(h.path(".gitignore"), "generated/\n").unwrap();

    let client = Arc::new(RecordingClient::default());
    let sub = h.attach("gopls", client.clone());
    sub.register("1", vec![WatchRegistration::new("**/*.go")]);

    let dep = h.touch("node_modules/dep/a.go");
    let generated = h.touch("generated/api.go");
    let kept = h.touch("cmd/main.go");
    h.send(FileEvent::write(&dep)).await;
    h.send(FileEvent::remove(&generated)).await;
    h.send(FileEvent::write(&kept)).await;
    past_window().await;

    assert_eq!(client.watched(), vec![change(&kept, FileChangeType::Changed)]);
    h.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_removed_ignored_directory_never_reaches_subscribers() {
    let ignore = Arc::new(GitignoreEvaluator::new());
    let h = Harness::with_ignore(ignore.clone());
    std::fs::write(h.path(".gitignore"), "generated/\n").unwrap();

    let client = Arc::new(RecordingClient::default());
    h.attach("generic", client.clone());

    let generated = h.touch("generated/api/types.go");
    h.send(FileEvent::write(&generated)).await;
    settle().await;
    assert!(ignore.cached_dirs() > 1);

    std::fs::remove_dir_all(h.path("generated")).unwrap();
    h.send(FileEvent::remove(&generated)).await;
    h.send(FileEvent::remove(h.path("generated/api"))).await;
    h.send(FileEvent::remove(h.path("generated"))).await;
    past_window().await;

    assert!(client.calls().is_empty());
    assert_eq!(ignore.cached_dirs(), 1);
    h.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_ignore_file_edit_takes_effect() {
    let h = Harness::with_ignore(Arc::new(GitignoreEvaluator::new()));
    let client = Arc::new(RecordingClient::default());
    h.attach("gopls", client.clone());

    let file = h.touch("scratch/a.go");
    h.send(FileEvent::write(&file)).await;
    past_window().await;
    assert_eq!(client.watched().len(), 1);

    let gitignore = h.path(".gitignore");
    std::fs::write(&gitignore, "scratch/\n").unwrap();
    h.send(FileEvent::write(&gitignore)).await;
    h.send(FileEvent::write(&file)).await;
    past_window().await;

    let uris: Vec<_> = client.watched().into_iter().map(|e| e.uri).collect();
    assert_eq!(uris, vec![uri(&file), uri(&gitignore)]);
    h.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unhandled_file_type_skipped() {
    let h = Harness::new();
    let client = Arc::new(RecordingClient::for_types(&["go"]));
    h.attach("gopls", client.clone());

    let readme = h.touch("README.md");
    h.send(FileEvent::write(&readme)).await;
    h.send(FileEvent::remove(&readme)).await;
    past_window().await;

    assert!(client.calls().is_empty());
    h.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_open_file_gets_did_change() {
    let h = Harness::new();
    let client = Arc::new(RecordingClient::default());
    h.attach("gopls", client.clone());

    let file = h.touch("a.go");
    client.mark_open(&file);
    h.send(FileEvent::write(&file)).await;
    past_window().await;

    assert_eq!(client.calls(), vec![Call::Change(file)]);
    h.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_created_anchor_file_is_opened() {
    let h = Harness::new();
    let client = Arc::new(RecordingClient::default());
    let gopls = h.attach("gopls", client.clone());
    gopls.set_root(h.root.clone());

    let manifest = h.touch("go.mod");
    let source = h.touch("x.go");
    h.send(FileEvent::create(&manifest)).await;
    h.send(FileEvent::create(&source)).await;
    settle().await;

    let opened: Vec<_> = client
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::Open(_)))
        .collect();
    assert_eq!(opened, vec![Call::Open(manifest)]);
    h.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_each_subscriber_keyed_separately() {
    let h = Harness::new();
    let go = Arc::new(RecordingClient::default());
    let other = Arc::new(RecordingClient::default());
    h.attach("gopls", go.clone());
    h.attach("other", other.clone());

    let file = h.touch("a.go");
    h.send(FileEvent::write(&file)).await;
    settle().await;
    assert_eq!(h.watcher.pending_debounce_count(), 2);

    past_window().await;
    assert_eq!(go.watched().len(), 1);
    assert_eq!(other.watched().len(), 1);
    h.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unregistered_subscriber_stops_receiving() {
    let h = Harness::new();
    let client = Arc::new(RecordingClient::default());
    h.attach("gopls", client.clone());
    assert!(h.watcher.unregister("gopls"));
    assert_eq!(h.watcher.subscriber_count(), 0);

    let file = h.touch("a.go");
    h.send(FileEvent::write(&file)).await;
    past_window().await;

    assert!(client.calls().is_empty());
    h.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_subscriber_watch_follows_cancellation() {
    let h = Harness::new();
    let client = Arc::new(RecordingClient::default());
    let subscriber = Arc::new(WorkspaceSubscriber::new("gopls", client.clone()));
    let cancel = CancellationToken::new();

    let task = tokio::spawn(Arc::clone(&subscriber).watch(
        h.watcher.clone(),
        cancel.clone(),
        h.root.clone(),
    ));
    settle().await;
    assert_eq!(h.watcher.subscriber_count(), 1);
    assert_eq!(subscriber.root(), Some(h.root.clone()));

    cancel.cancel();
    task.await.unwrap();
    assert_eq!(h.watcher.subscriber_count(), 0);
    h.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drops_pending_and_detaches() {
    let h = Harness::new();
    let client = Arc::new(RecordingClient::default());
    h.attach("gopls", client.clone());

    let file = h.touch("a.go");
    h.send(FileEvent::write(&file)).await;
    settle().await;
    assert_eq!(h.watcher.pending_debounce_count(), 1);

    h.watcher.shutdown().await;
    assert!(!h.watcher.is_started());
    assert!(!h.handle.is_attached());
    assert!(!h.handle.send(FileEvent::write(&file)).await);

    past_window().await;
    assert!(client.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_is_reported() {
    let dir = TempDir::new().unwrap();
    let watcher = GlobalWatcher::with_backend(
        &WatcherConfig::default(),
        Arc::new(NoIgnore),
        ChannelBackend::refusing("permission denied"),
    );

    let err = watcher.start(dir.path()).unwrap_err();
    assert!(err.to_string().contains("permission denied"));
    assert!(!watcher.is_started());
}
