//! Match command - test paths against a watch registration.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::watcher::{CompiledRegistration, WatchRegistration};

/// Print whether each path matches `pattern` (optionally relative to `base`).
///
/// Returns the number of matching paths.
pub fn run(pattern: &str, base: Option<&Path>, paths: &[PathBuf]) -> anyhow::Result<usize> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;

    let mut registration = WatchRegistration::new(pattern);
    if let Some(base) = base {
        registration = registration.with_base(cwd.join(base));
    }
    let compiled = CompiledRegistration::try_new("cli", registration)?;

    let mut matched = 0;
    for path in paths {
        let absolute = cwd.join(path);
        if compiled.matches(&absolute) {
            matched += 1;
            println!("{}: matched", path.display());
        } else {
            println!("{}: not matched", path.display());
        }
    }
    Ok(matched)
}
