//! Diagnostic logging on stderr.
//!
//! stdout belongs to the notification stream of `tidewatch watch`, so every
//! log line goes to stderr. Levels come from `[logging]` in the settings file
//! unless `RUST_LOG` is set, in which case the environment wins outright.
//!
//! ```toml
//! [logging]
//! default = "warn"
//!
//! [logging.modules]
//! "tidewatch::watcher" = "debug"
//! ```
//!
//! ```bash
//! RUST_LOG=tidewatch::watcher=trace tidewatch watch   # every raw OS event
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Wall-clock `HH:MM:SS.mmm`.
struct ClockTime;

impl FormatTime for ClockTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// `EnvFilter` directives for `config`: the default level followed by one
/// `target=level` pair per module override.
pub fn filter_directives(config: &LoggingConfig) -> String {
    config
        .modules
        .iter()
        .fold(config.default.clone(), |mut directives, (target, level)| {
            directives.push_str(&format!(",{target}={level}"));
            directives
        })
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = match std::env::var("RUST_LOG") {
            Ok(_) => EnvFilter::from_default_env(),
            Err(_) => EnvFilter::new(filter_directives(config)),
        };

        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_timer(ClockTime)
            .with_level(true)
            .with_filter(filter);

        tracing_subscriber::registry().with(layer).init();
    });
}

/// Install the subscriber before any settings are available (`init` runs
/// even when the existing settings file is broken).
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

/// `info` line tagged with the component that produced it.
///
/// ```ignore
/// log_event!("watcher", "started", "{}", root.display());
/// log_event!("gopls", "stopped watching");
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        tracing::info!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// Same shape as [`log_event!`] at `debug`.
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        tracing::debug!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}
