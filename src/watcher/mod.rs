//! Shared file watching for protocol servers.
//!
//! A single recursive OS watch fans out to any number of per-server
//! subscribers, each with its own glob-based interest.
//!
//! # Architecture
//!
//! ```text
//! WatchBackend (notify / channel)
//!         |
//!   GlobalWatcher intake worker
//!     - ignore filter
//!     - rename normalization
//!     - debounce table (creates, changes)
//!         |
//!    +----------+----------+
//!    |          |          |
//! Subscriber Subscriber Subscriber
//!  (gopls)   (tsserver)  (...)
//!    |          |          |
//! ProtocolClient per server
//! ```

pub mod backend;
pub mod client;
mod debouncer;
mod error;
mod global;
pub mod ignore;
pub mod preload;
pub mod rlimit;
mod subscriber;
mod types;

pub use backend::{ChannelBackend, ChannelBackendHandle, NotifyBackend, WatchBackend};
pub use client::{JsonLinesClient, ProtocolClient, handles_file_type};
pub use debouncer::{DebounceKey, DebounceTable};
pub use error::WatchError;
pub use global::GlobalWatcher;
pub use ignore::{GitignoreEvaluator, IgnoreEvaluator, NoIgnore};
pub use preload::{PreloadPolicy, ServerFamily};
pub use rlimit::{LimitError, ensure_open_file_limit, maximize_open_file_limit};
pub use subscriber::{CompiledRegistration, WorkspaceSubscriber, compile_glob};
pub use types::{
    ChangeEvent, FileChangeType, FileEvent, FileEventKind, WatchKind, WatchRegistration,
    path_to_uri, uri_to_path,
};
