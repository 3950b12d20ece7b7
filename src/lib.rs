pub mod cli;
pub mod config;
pub mod logging;
pub mod watcher;

pub use config::Settings;
pub use watcher::{
    GitignoreEvaluator, GlobalWatcher, JsonLinesClient, ProtocolClient, WatchError, WatchKind,
    WatchRegistration, WorkspaceSubscriber,
};
