//! CLI argument parsing using clap.
//!
//! Contains the Cli struct and the Commands enum.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

const AFTER_HELP: &str = "\
Quick Start:
  $ tidewatch init                         # Create .tidewatch/settings.toml
  $ tidewatch watch                        # Watch the workspace, print notifications
  $ tidewatch watch --server gopls         # Only attach one server
  $ tidewatch match --pattern '**/*.go' src/main.go
  $ tidewatch check-ignore node_modules/x.js";

/// Shared file watching for language and tool servers
#[derive(Parser)]
#[command(
    name = "tidewatch",
    version = env!("CARGO_PKG_VERSION"),
    about = "Shared file watching for language and tool servers",
    long_about = "Run one recursive file watch and fan change notifications out to \
                  per-server subscribers with glob-based interest.",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = AFTER_HELP
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Initialize project
    #[command(about = "Set up .tidewatch directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    #[command(about = "Display active settings as TOML")]
    Config,

    /// Watch a workspace and print notifications as JSON lines
    #[command(about = "Watch a workspace and emit server notifications on stdout")]
    Watch {
        /// Workspace root (defaults to the configured or detected root)
        #[arg(value_name = "ROOT")]
        root: Option<PathBuf>,

        /// Debounce window in milliseconds (overrides config)
        #[arg(long, value_name = "MS")]
        debounce_ms: Option<u64>,

        /// Only attach these servers (repeatable)
        #[arg(long = "server", value_name = "NAME")]
        servers: Vec<String>,
    },

    /// Raise and report the open file limit
    #[command(about = "Raise the open file descriptor limit and print it")]
    Limits,

    /// Test paths against a watch registration
    #[command(name = "match", about = "Check whether paths match a watch pattern")]
    Match {
        /// Glob pattern (LSP semantics)
        #[arg(long, short)]
        pattern: String,

        /// Base directory the pattern is relative to
        #[arg(long, short)]
        base: Option<PathBuf>,

        /// Paths to test
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,
    },

    /// Test paths against the ignore rules
    #[command(name = "check-ignore", about = "Check whether paths are excluded from watching")]
    CheckIgnore {
        /// Workspace root (defaults to the configured or detected root)
        #[arg(long)]
        root: Option<PathBuf>,

        /// Paths to test
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,
    },
}
