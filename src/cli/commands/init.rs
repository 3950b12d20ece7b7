//! Init and Config commands.

use anyhow::Context;

use crate::config::Settings;

/// Run init command - create configuration and ignore files in the current directory.
pub fn run_init(force: bool) -> anyhow::Result<()> {
    let dir = std::env::current_dir().context("Failed to read current directory")?;
    let path = Settings::init_config_file(&dir, force)?;

    println!("Created configuration file at: {}", path.display());
    println!("Edit this file to configure servers and watch patterns.");
    Ok(())
}

/// Run config command - display current configuration.
pub fn run_config(config: &Settings) -> anyhow::Result<()> {
    let toml_str = toml::to_string_pretty(config).context("Failed to render configuration")?;
    println!("{toml_str}");
    Ok(())
}
