//! Configuration for the watcher and the servers it feeds.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`.tidewatch/settings.toml`)
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `TIDEWATCH_` and use double
//! underscores to separate nested levels:
//! - `TIDEWATCH_WATCHER__DEBOUNCE_MS=500` sets `watcher.debounce_ms`
//! - `TIDEWATCH_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::watcher::{WatchKind, WatchRegistration};

/// Directory holding the settings file, relative to the workspace root.
pub const CONFIG_DIR: &str = ".tidewatch";
/// Settings file name inside [`CONFIG_DIR`].
pub const SETTINGS_FILE: &str = "settings.toml";
/// Project-specific ignore file, gitignore syntax.
pub const IGNORE_FILE: &str = ".tidewatchignore";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Workspace root directory (where .tidewatch is located)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Shared watcher configuration
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Seed-file preloading limits and catalog overrides
    #[serde(default)]
    pub preload: PreloadConfig,

    /// Protocol servers keyed by identity (e.g. "gopls")
    #[serde(default)]
    pub servers: IndexMap<String, ServerConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for all targets
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `tidewatch::watcher = "trace"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatcherConfig {
    /// Debounce window for create/change notifications
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Capacity of the OS event intake queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Replace earlier registrations that carry the same id instead of
    /// accumulating them
    #[serde(default)]
    pub replace_registrations_by_id: bool,

    /// Extra gitignore-style patterns excluded from watching
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Log every per-subscriber match decision
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PreloadConfig {
    /// Maximum files opened per anchor pattern
    #[serde(default = "default_per_pattern_cap")]
    pub per_pattern_cap: usize,

    /// Files opened back to back before pausing
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,

    /// Files larger than this are never opened
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Ceiling for opportunistic preloading of non-anchor files
    #[serde(default = "default_max_preload_size")]
    pub max_preload_size: u64,

    /// Anchor pattern overrides keyed by server identity
    #[serde(default)]
    pub patterns: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct ServerConfig {
    /// Skip this server entirely
    #[serde(default)]
    pub disabled: bool,

    /// File types the server handles (extensions, leading dot optional).
    /// Empty means every file.
    #[serde(default)]
    pub file_types: Vec<String>,

    /// Static watch registrations applied when the server is attached
    #[serde(default)]
    pub watchers: Vec<WatchRegistration>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_log_level() -> String {
    "warn".to_string()
}
fn default_debounce_ms() -> u64 {
    300
}
fn default_queue_capacity() -> usize {
    4096
}
fn default_per_pattern_cap() -> usize {
    5
}
fn default_batch_size() -> usize {
    3
}
fn default_batch_pause_ms() -> u64 {
    50
}
fn default_max_file_size() -> u64 {
    5 * 1024 * 1024
}
fn default_max_preload_size() -> u64 {
    1024 * 1024
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            workspace_root: None,
            logging: LoggingConfig::default(),
            watcher: WatcherConfig::default(),
            preload: PreloadConfig::default(),
            servers: default_servers(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            queue_capacity: default_queue_capacity(),
            replace_registrations_by_id: false,
            ignore_patterns: Vec::new(),
            debug: false,
        }
    }
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            per_pattern_cap: default_per_pattern_cap(),
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
            max_file_size: default_max_file_size(),
            max_preload_size: default_max_preload_size(),
            patterns: HashMap::new(),
        }
    }
}

fn default_servers() -> IndexMap<String, ServerConfig> {
    let mut servers = IndexMap::new();

    servers.insert(
        "gopls".to_string(),
        ServerConfig {
            disabled: false,
            file_types: vec!["go".to_string(), "mod".to_string(), "sum".to_string()],
            watchers: vec![
                WatchRegistration::new("**/*.go"),
                WatchRegistration::new("**/go.{mod,sum}")
                    .with_kind(WatchKind::CREATE | WatchKind::CHANGE | WatchKind::DELETE),
            ],
        },
    );

    servers.insert(
        "rust-analyzer".to_string(),
        ServerConfig {
            disabled: true,
            file_types: vec!["rs".to_string(), "toml".to_string()],
            watchers: Vec::new(),
        },
    );

    servers
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(SETTINGS_FILE));

        Self::figment(&config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref()).extract().map_err(Box::new)
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // Double underscore (__) separates nested levels, single
            // underscores remain part of field names
            .merge(
                Env::prefixed("TIDEWATCH_")
                    .map(|key| key.as_str().to_lowercase().replace("__", ".").into()),
            )
    }

    /// Find `.tidewatch/settings.toml`, searching from the current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join(SETTINGS_FILE))
    }

    /// Get the workspace root directory (where .tidewatch is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Root to watch: explicit setting, then detected workspace, then cwd.
    pub fn resolved_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .or_else(Self::workspace_root)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Enabled servers in declaration order.
    pub fn enabled_servers(&self) -> impl Iterator<Item = (&String, &ServerConfig)> {
        self.servers.iter().filter(|(_, server)| !server.disabled)
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file and ignore file in `dir`.
    pub fn init_config_file(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
        let config_path = dir.join(CONFIG_DIR).join(SETTINGS_FILE);

        if !force && config_path.exists() {
            anyhow::bail!("Configuration file already exists. Use --force to overwrite");
        }

        let settings = Settings {
            workspace_root: Some(dir.to_path_buf()),
            ..Settings::default()
        };
        settings.save(&config_path)?;

        let ignore_path = dir.join(IGNORE_FILE);
        if force || !ignore_path.exists() {
            std::fs::write(&ignore_path, DEFAULT_IGNORE_CONTENT)?;
        }

        Ok(config_path)
    }
}

const DEFAULT_IGNORE_CONTENT: &str = r#"# tidewatch ignore patterns (gitignore syntax)
#
# Events under these paths never reach any language or tool server.
# Version control, dependency and build directories are excluded already.

# Generated files
*.generated.*
*_pb2.py
*.pb.go

# Coverage output
coverage/
.nyc_output/
"#;
