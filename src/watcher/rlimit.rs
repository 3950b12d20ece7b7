//! Open file descriptor limit bootstrap.
//!
//! A recursive watch over a large tree can hold one descriptor per directory
//! on some backends, so the soft `RLIMIT_NOFILE` is raised toward the hard
//! limit once per process before the first watch is established.

use std::io;
use std::sync::OnceLock;

use thiserror::Error;

/// Value reported on platforms without descriptor limits.
pub const UNLIMITED_FALLBACK: u64 = 1 << 20;

/// macOS rejects a soft limit above `OPEN_MAX` even when the hard limit is
/// reported as unlimited.
#[cfg(target_os = "macos")]
const DARWIN_OPEN_MAX: u64 = 10240;

#[derive(Error, Debug)]
pub enum LimitError {
    #[error("Failed to read open file limit: {0}")]
    Query(#[source] io::Error),

    #[error("Failed to raise open file limit to {requested} (still {current}): {source}")]
    Raise {
        requested: u64,
        current: u64,
        #[source]
        source: io::Error,
    },
}

/// Raise the soft open-file limit as far as the platform allows.
///
/// Returns the effective soft limit after the change. The limit is re-read
/// after raising it because the kernel may clamp the requested value.
#[cfg(unix)]
pub fn maximize_open_file_limit() -> Result<u64, LimitError> {
    let current = get_nofile().map_err(LimitError::Query)?;

    if current.rlim_cur >= current.rlim_max {
        return Ok(current.rlim_cur as u64);
    }

    #[allow(unused_mut)]
    let mut target = current.rlim_max as u64;
    #[cfg(target_os = "macos")]
    {
        target = target.min(DARWIN_OPEN_MAX);
    }

    if target <= current.rlim_cur as u64 {
        return Ok(current.rlim_cur as u64);
    }

    let requested = libc::rlimit {
        rlim_cur: target as libc::rlim_t,
        rlim_max: current.rlim_max,
    };
    // SAFETY: `requested` is a valid, initialized rlimit for the duration of the call.
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &raw const requested) };
    if rc != 0 {
        return Err(LimitError::Raise {
            requested: target,
            current: current.rlim_cur as u64,
            source: io::Error::last_os_error(),
        });
    }

    let updated = get_nofile().map_err(LimitError::Query)?;
    Ok(updated.rlim_cur as u64)
}

#[cfg(unix)]
fn get_nofile() -> io::Result<libc::rlimit> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `limit` is a valid out-pointer for the duration of the call.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &raw mut limit) };
    if rc == 0 {
        Ok(limit)
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Platforms without descriptor limits report a large constant.
#[cfg(not(unix))]
pub fn maximize_open_file_limit() -> Result<u64, LimitError> {
    Ok(UNLIMITED_FALLBACK)
}

static RAISED: OnceLock<Option<u64>> = OnceLock::new();

/// Run [`maximize_open_file_limit`] once per process and log the outcome.
///
/// Failure is never fatal; watching simply covers fewer directories on
/// pathological trees. Returns the effective limit when it could be determined.
pub fn ensure_open_file_limit() -> Option<u64> {
    *RAISED.get_or_init(|| match maximize_open_file_limit() {
        Ok(limit) => {
            crate::debug_event!("rlimit", "open file limit", "{limit}");
            Some(limit)
        }
        Err(e) => {
            tracing::warn!("[rlimit] {e}");
            None
        }
    })
}
