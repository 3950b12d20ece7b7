//! Command implementations for the CLI.
//!
//! Each command is implemented in its own module.

pub mod check_ignore;
pub mod init;
pub mod limits;
pub mod match_pattern;
pub mod watch;
