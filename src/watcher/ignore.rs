//! Ignore evaluation for watched paths.
//!
//! Events for excluded paths are dropped before any subscriber sees them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use ignore::Match;
use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::config::IGNORE_FILE;

/// Answers whether a path under a workspace root is excluded from watching.
pub trait IgnoreEvaluator: Send + Sync {
    fn should_exclude(&self, root: &Path, path: &Path) -> bool;

    /// Drop any cached rules loaded from `ignore_file`.
    fn invalidate(&self, _ignore_file: &Path) {}

    /// Whether `path` is an ignore file whose edits change the rules.
    fn is_ignore_file(&self, _path: &Path) -> bool {
        false
    }

    /// Drop cached state for a removed path and everything below it.
    fn forget(&self, _path: &Path) {}
}

/// Evaluator that never excludes anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIgnore;

impl IgnoreEvaluator for NoIgnore {
    fn should_exclude(&self, _root: &Path, _path: &Path) -> bool {
        false
    }
}

/// Directories and files no protocol server needs to hear about.
const COMMON_IGNORE_PATTERNS: &[&str] = &[
    // Version control
    ".git",
    ".svn",
    ".hg",
    ".bzr",
    // IDE and editor files
    ".vscode",
    ".idea",
    "*.swp",
    "*.swo",
    "*~",
    ".DS_Store",
    "Thumbs.db",
    // Build artifacts and dependencies
    "node_modules",
    "target",
    "build",
    "dist",
    "out",
    "bin",
    "obj",
    "*.o",
    "*.so",
    "*.dylib",
    "*.dll",
    "*.exe",
    // Logs and temporary files
    "*.log",
    "*.tmp",
    "*.temp",
    ".cache",
    ".tmp",
    // Language-specific
    "__pycache__",
    "*.pyc",
    "*.pyo",
    ".pytest_cache",
    "vendor",
    "Cargo.lock",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    // OS generated files
    ".Trash",
    ".Spotlight-V100",
    ".fseventsd",
    // Our own state
    ".tidewatch",
];

/// Per-directory ignore files consulted, in precedence order.
const IGNORE_FILE_NAMES: &[&str] = &[".gitignore", IGNORE_FILE];

/// Gitignore-backed evaluator.
///
/// Combines a built-in list of common patterns, extra configured patterns,
/// and `.gitignore` / `.tidewatchignore` files found between the path and
/// the workspace root. Parsed ignore files are cached per directory.
pub struct GitignoreEvaluator {
    common: Gitignore,
    per_dir: DashMap<PathBuf, Arc<Gitignore>>,
}

impl GitignoreEvaluator {
    pub fn new() -> Self {
        Self::with_patterns(&[])
    }

    /// Build with extra gitignore-style lines on top of the common set.
    pub fn with_patterns(extra: &[String]) -> Self {
        let mut builder = GitignoreBuilder::new("");
        for line in COMMON_IGNORE_PATTERNS
            .iter()
            .copied()
            .chain(extra.iter().map(String::as_str))
        {
            if let Err(e) = builder.add_line(None, line) {
                tracing::warn!("[ignore] invalid pattern '{line}': {e}");
            }
        }
        let common = builder.build().unwrap_or_else(|e| {
            tracing::warn!("[ignore] failed to build common patterns: {e}");
            Gitignore::empty()
        });

        Self {
            common,
            per_dir: DashMap::new(),
        }
    }

    /// Number of directories with cached rules.
    pub fn cached_dirs(&self) -> usize {
        self.per_dir.len()
    }

    fn excluded_as(&self, root: &Path, path: &Path, relative: &Path, is_dir: bool) -> bool {
        // Deepest directory with a matching rule decides
        let mut dir = path.parent();
        while let Some(current) = dir {
            if !current.starts_with(root) {
                break;
            }
            match self.rules_for(current).matched_path_or_any_parents(path, is_dir) {
                Match::Ignore(_) => return true,
                Match::Whitelist(_) => return false,
                Match::None => {}
            }
            dir = current.parent();
        }

        self.common
            .matched_path_or_any_parents(relative, is_dir)
            .is_ignore()
    }

    /// Rules declared by ignore files directly inside `dir`.
    fn rules_for(&self, dir: &Path) -> Arc<Gitignore> {
        if let Some(rules) = self.per_dir.get(dir) {
            return Arc::clone(rules.value());
        }

        let mut builder = GitignoreBuilder::new(dir);
        for name in IGNORE_FILE_NAMES {
            let file = dir.join(name);
            if file.is_file() {
                crate::debug_event!("ignore", "loading", "{}", file.display());
                if let Some(e) = builder.add(&file) {
                    tracing::warn!("[ignore] failed to read {}: {e}", file.display());
                }
            }
        }
        let rules = Arc::new(builder.build().unwrap_or_else(|e| {
            tracing::warn!("[ignore] failed to build rules for {}: {e}", dir.display());
            Gitignore::empty()
        }));

        self.per_dir
            .entry(dir.to_path_buf())
            .or_insert(rules)
            .value()
            .clone()
    }
}

impl Default for GitignoreEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl IgnoreEvaluator for GitignoreEvaluator {
    fn should_exclude(&self, root: &Path, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(root) else {
            return false;
        };
        if relative.as_os_str().is_empty() {
            return false;
        }

        // A removed path may have been a directory; dir-only rules still apply
        match std::fs::metadata(path) {
            Ok(meta) => self.excluded_as(root, path, relative, meta.is_dir()),
            Err(_) => {
                self.excluded_as(root, path, relative, false)
                    || self.excluded_as(root, path, relative, true)
            }
        }
    }

    fn invalidate(&self, ignore_file: &Path) {
        if let Some(dir) = ignore_file.parent() {
            if self.per_dir.remove(dir).is_some() {
                crate::debug_event!("ignore", "invalidated", "{}", dir.display());
            }
        }
    }

    fn is_ignore_file(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| IGNORE_FILE_NAMES.contains(&name))
    }

    fn forget(&self, path: &Path) {
        let before = self.per_dir.len();
        self.per_dir.retain(|dir, _| !dir.starts_with(path));
        let dropped = before.saturating_sub(self.per_dir.len());
        if dropped > 0 {
            crate::debug_event!("ignore", "forgot", "{dropped} cached dirs under {}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        for sub in ["node_modules/pkg", "src", "custom_ignored", "keep"] {
            fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        fs::write(dir.path().join(".gitignore"), "custom_ignored/\n*.gen.go\n").unwrap();
        dir
    }

    #[test]
    fn test_common_patterns_exclude_dependency_dirs() {
        let dir = tree();
        let eval = GitignoreEvaluator::new();
        let root = dir.path();

        assert!(eval.should_exclude(root, &root.join("node_modules/pkg/index.js")));
        assert!(eval.should_exclude(root, &root.join("node_modules")));
        assert!(eval.should_exclude(root, &root.join(".git/HEAD")));
        assert!(!eval.should_exclude(root, &root.join("src/main.go")));
    }

    #[test]
    fn test_gitignore_rules_apply() {
        let dir = tree();
        let eval = GitignoreEvaluator::new();
        let root = dir.path();

        assert!(eval.should_exclude(root, &root.join("custom_ignored/a.go")));
        assert!(eval.should_exclude(root, &root.join("src/x.gen.go")));
        assert!(!eval.should_exclude(root, &root.join("keep/a.go")));
    }

    #[test]
    fn test_nested_whitelist_overrides_parent() {
        let dir = tree();
        let root = dir.path();
        fs::write(root.join("src/.gitignore"), "!x.gen.go\n").unwrap();

        let eval = GitignoreEvaluator::new();
        assert!(!eval.should_exclude(root, &root.join("src/x.gen.go")));
    }

    #[test]
    fn test_project_ignore_file_and_extra_patterns() {
        let dir = tree();
        let root = dir.path();
        fs::write(root.join(IGNORE_FILE), "keep/\n").unwrap();

        let eval = GitignoreEvaluator::with_patterns(&["*.proto".to_string()]);
        assert!(eval.should_exclude(root, &root.join("keep/a.go")));
        assert!(eval.should_exclude(root, &root.join("src/api.proto")));
    }

    #[test]
    fn test_paths_outside_root_never_excluded() {
        let dir = tree();
        let eval = GitignoreEvaluator::new();
        assert!(!eval.should_exclude(&dir.path().join("src"), Path::new("/elsewhere/target/x")));
        assert!(!eval.should_exclude(dir.path(), dir.path()));
    }

    #[test]
    fn test_invalidate_reloads_rules() {
        let dir = tree();
        let root = dir.path();
        let eval = GitignoreEvaluator::new();

        assert!(!eval.should_exclude(root, &root.join("keep/a.go")));

        let gitignore = root.join(".gitignore");
        fs::write(&gitignore, "keep/\n").unwrap();
        assert!(eval.is_ignore_file(&gitignore));
        eval.invalidate(&gitignore);

        assert!(eval.should_exclude(root, &root.join("keep/a.go")));
    }

    #[test]
    fn test_removed_directory_still_matches_dir_rules() {
        let dir = tree();
        let root = dir.path();
        let eval = GitignoreEvaluator::new();

        assert!(eval.should_exclude(root, &root.join("custom_ignored")));
        fs::remove_dir(root.join("custom_ignored")).unwrap();
        assert!(eval.should_exclude(root, &root.join("custom_ignored")));
        assert!(!eval.should_exclude(root, &root.join("gone_but_kept")));
    }

    #[test]
    fn test_forget_drops_cached_subtree() {
        let dir = tree();
        let root = dir.path();
        fs::create_dir_all(root.join("keep/deep")).unwrap();
        let eval = GitignoreEvaluator::new();

        eval.should_exclude(root, &root.join("keep/deep/a.go"));
        eval.should_exclude(root, &root.join("src/a.go"));
        assert_eq!(eval.cached_dirs(), 4);

        eval.forget(&root.join("keep"));
        assert_eq!(eval.cached_dirs(), 2);
        assert!(!eval.should_exclude(root, &root.join("src/a.go")));
    }
}
