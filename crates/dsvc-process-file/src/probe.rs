//! Lock-file liveness probe.
//!
//! The directory server holds an exclusive lock on `locks/server.lock` for
//! as long as it runs. Trying to take that lock without blocking tells us
//! whether a server is alive:
//!
//! - lock acquired: nobody holds it, the server is not running (the lock is
//!   released again before returning)
//! - lock contended: the server is running
//! - anything else, including failing to open the file: [`ProcessError::ProbeFailed`]
//!
//! The only error treated as "running" is the one the platform reports for
//! a contended non-blocking lock (`EAGAIN`/`EACCES` on Unix,
//! `ERROR_LOCK_VIOLATION` on Windows). The lock covers byte 0, length 1.

use crate::lock::{try_lock_byte, unlock_byte, LockAttempt};
use dsvc_common::{ProcessError, ProcessResult, ServerInstance};
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Result of a successful liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    NotRunning,
}

impl Liveness {
    pub fn is_running(&self) -> bool {
        matches!(self, Liveness::Running)
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Liveness::Running => write!(f, "running"),
            Liveness::NotRunning => write!(f, "not running"),
        }
    }
}

/// Anything that can tell whether the server is running.
///
/// Implementations must never block.
pub trait LivenessCheck: Send + Sync {
    fn check(&self) -> ProcessResult<Liveness>;
}

impl<F> LivenessCheck for F
where
    F: Fn() -> ProcessResult<Liveness> + Send + Sync,
{
    fn check(&self) -> ProcessResult<Liveness> {
        self()
    }
}

/// Probe backed by the instance lock file.
#[derive(Debug, Clone)]
pub struct LockFileProbe {
    path: PathBuf,
}

impl LockFileProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_instance(instance: &ServerInstance) -> Self {
        Self::new(instance.lock_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LivenessCheck for LockFileProbe {
    fn check(&self) -> ProcessResult<Liveness> {
        let path = self.path.display().to_string();

        // The server owns creation of the lock file; never create it here.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| ProcessError::probe_failed(&path, format!("cannot open lock file: {}", e)))?;

        match try_lock_byte(&file) {
            Ok(LockAttempt::Acquired) => {
                unlock_byte(&file)
                    .map_err(|e| ProcessError::probe_failed(&path, format!("cannot release lock: {}", e)))?;
                debug!("Lock on {} acquired and released: server is not running", path);
                Ok(Liveness::NotRunning)
            }
            Ok(LockAttempt::Contended) => {
                debug!("Lock on {} is held: server is running", path);
                Ok(Liveness::Running)
            }
            Err(e) => Err(ProcessError::probe_failed(&path, format!("lock attempt failed: {}", e))),
        }
    }
}
