//! Limits command.

use anyhow::Context;

use crate::watcher::maximize_open_file_limit;

/// Raise the open file limit as far as allowed and print the result.
pub fn run() -> anyhow::Result<()> {
    let limit = maximize_open_file_limit().context("Could not raise the open file limit")?;
    println!("open file limit: {limit}");
    Ok(())
}
