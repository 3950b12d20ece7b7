//! Preload heuristics for protocol servers that need seed files opened.
//!
//! Some servers only produce correct results after seeing manifests and
//! entry points. A static catalog of anchor patterns per server identity is
//! resolved against the workspace and the matches are opened in small,
//! paced batches.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use globset::{GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use tokio_util::sync::CancellationToken;

use super::client::ProtocolClient;
use super::ignore::IgnoreEvaluator;
use super::subscriber::compile_glob;
use crate::config::{IGNORE_FILE, PreloadConfig};

/// Server families sharing one catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerFamily {
    TypeScript,
    Go,
    Rust,
    Python,
    Clangd,
    Java,
    Other,
}

impl ServerFamily {
    pub fn of(server: &str) -> Self {
        match server.to_ascii_lowercase().as_str() {
            "typescript" | "typescript-language-server" | "tsserver" | "vtsls" => Self::TypeScript,
            "gopls" => Self::Go,
            "rust-analyzer" => Self::Rust,
            "python" | "pyright" | "pylsp" => Self::Python,
            "clangd" => Self::Clangd,
            "java" | "jdtls" => Self::Java,
            _ => Self::Other,
        }
    }

    /// Anchor patterns for this family.
    pub fn anchor_patterns(self) -> &'static [&'static str] {
        match self {
            Self::TypeScript => &[
                "**/tsconfig.json",
                "**/package.json",
                "**/jsconfig.json",
                "**/index.ts",
                "**/index.js",
                "**/main.ts",
                "**/main.js",
            ],
            Self::Go => &["**/go.mod", "**/go.sum", "**/main.go"],
            Self::Rust => &[
                "**/Cargo.toml",
                "**/Cargo.lock",
                "**/src/lib.rs",
                "**/src/main.rs",
            ],
            Self::Python => &[
                "**/pyproject.toml",
                "**/setup.py",
                "**/requirements.txt",
                "**/__init__.py",
                "**/__main__.py",
            ],
            Self::Clangd => &[
                "**/CMakeLists.txt",
                "**/Makefile",
                "**/compile_commands.json",
            ],
            Self::Java => &[
                "**/pom.xml",
                "**/build.gradle",
                "**/src/main/java/**/*.java",
            ],
            Self::Other => &["**/package.json", "**/Makefile", "**/CMakeLists.txt"],
        }
    }

    /// Families whose servers get seed files opened on registration.
    pub fn wants_preload(self) -> bool {
        matches!(self, Self::TypeScript | Self::Java)
    }

    /// Java servers need broad visibility to build a usable model.
    pub fn cap_exempt(self) -> bool {
        matches!(self, Self::Java)
    }
}

const EXCLUDED_EXTENSIONS: &[&str] = &[
    // temp, build and lock files
    "swp", "swo", "tmp", "temp", "bak", "log", "o", "so", "dylib", "dll", "a", "exe", "lock",
    // binary and media
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "zip", "tar", "gz", "rar", "7z", "pdf", "mp3",
    "mp4", "mov", "wav", "wasm",
];

/// Whether a file must never be opened on a server.
///
/// Dotfiles, excluded extensions, files that cannot be stat'ed, directories
/// and files larger than `max_size` are all skipped.
pub fn should_exclude_file(path: &Path, max_size: u64) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return true;
    };
    if name.starts_with('.') {
        return true;
    }

    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        let ext = ext.to_ascii_lowercase();
        if EXCLUDED_EXTENSIONS.contains(&ext.as_str()) {
            return true;
        }
    }

    match std::fs::metadata(path) {
        Ok(meta) => !meta.is_file() || meta.len() > max_size,
        Err(_) => true,
    }
}

/// Catalog plus limits, resolved from configuration.
#[derive(Debug, Clone, Default)]
pub struct PreloadPolicy {
    config: PreloadConfig,
    /// Compiled anchor sets per server, with the number of usable patterns.
    compiled: DashMap<String, Arc<(GlobSet, usize)>>,
}

impl PreloadPolicy {
    pub fn new(config: PreloadConfig) -> Self {
        Self {
            config,
            compiled: DashMap::new(),
        }
    }

    pub fn config(&self) -> &PreloadConfig {
        &self.config
    }

    pub fn should_preload(&self, server: &str) -> bool {
        ServerFamily::of(server).wants_preload()
    }

    /// Anchor patterns for `server`, honouring configured overrides.
    pub fn patterns_for(&self, server: &str) -> Vec<String> {
        if let Some(patterns) = self.config.patterns.get(server) {
            return patterns.clone();
        }
        ServerFamily::of(server)
            .anchor_patterns()
            .iter()
            .map(|p| (*p).to_string())
            .collect()
    }

    fn glob_set(&self, server: &str) -> Arc<(GlobSet, usize)> {
        if let Some(compiled) = self.compiled.get(server) {
            return Arc::clone(compiled.value());
        }

        let patterns = self.patterns_for(server);
        let mut builder = GlobSetBuilder::new();
        let mut count = 0;
        for pattern in &patterns {
            match compile_glob(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                    count += 1;
                }
                Err(e) => tracing::warn!("[preload] {server}: {e}"),
            }
        }
        let set = builder.build().unwrap_or_else(|e| {
            tracing::warn!("[preload] {server}: failed to build pattern set: {e}");
            GlobSet::empty()
        });

        let compiled = Arc::new((set, count));
        self.compiled
            .insert(server.to_string(), Arc::clone(&compiled));
        compiled
    }

    /// Whether `path` matches one of the server's anchor patterns.
    pub fn is_high_priority(&self, server: &str, root: &Path, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(root) else {
            return false;
        };
        self.glob_set(server).0.is_match(relative)
    }

    /// Resolve the anchor patterns against the tree under `root`.
    ///
    /// Each pattern contributes at most `per_pattern_cap` files unless the
    /// server is cap exempt. Blocking; run it off the async workers.
    pub fn collect_seed_files(
        &self,
        server: &str,
        root: &Path,
        ignore: Arc<dyn IgnoreEvaluator>,
    ) -> Vec<PathBuf> {
        let compiled = self.glob_set(server);
        let (set, pattern_count) = (&compiled.0, compiled.1);
        if pattern_count == 0 {
            return Vec::new();
        }
        let cap = if ServerFamily::of(server).cap_exempt() {
            usize::MAX
        } else {
            self.config.per_pattern_cap
        };

        let walk_root = root.to_path_buf();
        let walker = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .git_exclude(true)
            .require_git(false)
            .follow_links(false)
            .add_custom_ignore_filename(IGNORE_FILE)
            .filter_entry(move |entry| !ignore.should_exclude(&walk_root, entry.path()))
            .build();

        let mut per_pattern = vec![0usize; pattern_count];
        let mut seen = HashSet::new();
        let mut files = Vec::new();

        for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let path = entry.path();
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };

            for index in set.matches(relative) {
                if per_pattern[index] >= cap {
                    continue;
                }
                if should_exclude_file(path, self.config.max_file_size) {
                    break;
                }
                per_pattern[index] += 1;
                if seen.insert(path.to_path_buf()) {
                    files.push(path.to_path_buf());
                }
            }
        }

        files
    }
}

/// Open `files` on `client` in batches, pausing between batches.
///
/// Stops early when `cancel` fires. Returns how many files were opened.
pub async fn open_in_batches(
    server: &str,
    client: &dyn ProtocolClient,
    files: &[PathBuf],
    config: &PreloadConfig,
    cancel: &CancellationToken,
) -> usize {
    let batch_size = config.batch_size.max(1);
    let pause = Duration::from_millis(config.batch_pause_ms);
    let mut opened = 0;

    for (batch_index, batch) in files.chunks(batch_size).enumerate() {
        if batch_index > 0 {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        if cancel.is_cancelled() {
            break;
        }

        for path in batch {
            if client.is_file_open(path) {
                continue;
            }
            match client.open_file(path).await {
                Ok(()) => opened += 1,
                Err(e) => tracing::warn!("[{server}] failed to preload {}: {e:#}", path.display()),
            }
        }
    }

    opened
}
