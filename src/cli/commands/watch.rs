//! Watch command - run the shared watcher with one subscriber per server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Settings;
use crate::watcher::{
    GitignoreEvaluator, GlobalWatcher, IgnoreEvaluator, JsonLinesClient, PreloadPolicy,
    ProtocolClient, WorkspaceSubscriber,
};

/// Arguments for the watch command.
pub struct WatchArgs {
    pub root: Option<PathBuf>,
    pub debounce_ms: Option<u64>,
    pub servers: Vec<String>,
}

/// Run the watch command until Ctrl-C.
pub async fn run(args: WatchArgs, mut settings: Settings) -> anyhow::Result<()> {
    let WatchArgs {
        root,
        debounce_ms,
        servers,
    } = args;

    if let Some(ms) = debounce_ms {
        settings.watcher.debounce_ms = ms;
    }

    let root = root.unwrap_or_else(|| settings.resolved_root());
    let root = root
        .canonicalize()
        .with_context(|| format!("Workspace root {} is not accessible", root.display()))?;

    let ignore: Arc<dyn IgnoreEvaluator> = Arc::new(GitignoreEvaluator::with_patterns(
        &settings.watcher.ignore_patterns,
    ));
    let watcher = GlobalWatcher::new(&settings.watcher, Arc::clone(&ignore));
    watcher
        .start(&root)
        .with_context(|| format!("Failed to watch {}", root.display()))?;

    for requested in &servers {
        if !settings.servers.contains_key(requested) {
            tracing::warn!("[watch] unknown server '{requested}'");
        }
    }

    let preload = Arc::new(PreloadPolicy::new(settings.preload.clone()));
    let cancel = CancellationToken::new();
    let tasks = TaskTracker::new();
    let mut attached = 0;

    for (name, server) in settings.enabled_servers() {
        if !servers.is_empty() && !servers.contains(name) {
            continue;
        }

        let client: Arc<dyn ProtocolClient> = Arc::new(JsonLinesClient::new(
            name.clone(),
            server.file_types.clone(),
            std::io::stdout(),
        ));
        let subscriber = Arc::new(
            WorkspaceSubscriber::new(name.clone(), client)
                .with_preload(Arc::clone(&preload))
                .with_ignore(Arc::clone(&ignore))
                .replace_registrations_by_id(settings.watcher.replace_registrations_by_id)
                .with_debug(settings.watcher.debug),
        );
        subscriber.set_root(root.clone());
        if !server.watchers.is_empty() {
            subscriber.register("settings", server.watchers.clone());
        }

        tasks.spawn(subscriber.watch(watcher.clone(), cancel.clone(), root.clone()));
        attached += 1;
    }

    if attached == 0 {
        tracing::warn!("[watch] no servers attached, events will be dropped");
    }
    eprintln!(
        "Watching {} for {attached} server(s). Press Ctrl-C to stop.",
        root.display()
    );

    let signal = tokio::signal::ctrl_c().await;

    cancel.cancel();
    tasks.close();
    tasks.wait().await;
    watcher.shutdown().await;

    signal.context("Failed to listen for Ctrl-C")?;
    Ok(())
}
