//! Check-ignore command - test paths against the ignore rules.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::Settings;
use crate::watcher::{GitignoreEvaluator, IgnoreEvaluator};

/// Print whether each path is excluded from watching under `root`.
///
/// Returns the number of excluded paths.
pub fn run(root: Option<&Path>, paths: &[PathBuf], settings: &Settings) -> anyhow::Result<usize> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let root = match root {
        Some(root) => cwd.join(root),
        None => settings.resolved_root(),
    };
    let root = root.canonicalize().unwrap_or(root);
    let evaluator = GitignoreEvaluator::with_patterns(&settings.watcher.ignore_patterns);

    let mut excluded = 0;
    for path in paths {
        let absolute = if path.is_absolute() {
            path.clone()
        } else {
            root.join(path)
        };
        if evaluator.should_exclude(&root, &absolute) {
            excluded += 1;
            println!("{}: ignored", path.display());
        } else {
            println!("{}: watched", path.display());
        }
    }
    Ok(excluded)
}
