//! # dsvc-process-file
//!
//! On-disk state of a directory server instance.
//!
//! This crate provides:
//! - The PID file (`<instanceDir>/logs/server.pid`), holding the decimal
//!   process id of the supervised server
//! - The lock-file liveness probe (`<instanceDir>/locks/server.lock`) and
//!   the byte-range lock it tests
//!
//! The PID file is bookkeeping only. Whether the server is alive is decided
//! by the probe, never by the presence of the PID file.

use dsvc_common::{ProcessError, ProcessResult, ServerInstance};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub mod lock;
pub mod probe;

pub use lock::{LockAttempt, ServerLock};
pub use probe::{Liveness, LivenessCheck, LockFileProbe};

/// The PID file of one server instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_instance(instance: &ServerInstance) -> Self {
        Self::new(instance.pid_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Write the pid as the sole content of the file, replacing any prior content.
    ///
    /// The parent directory is not created: a missing `logs` directory means
    /// the instance is not laid out and the write fails.
    pub async fn write(&self, pid: u32) -> ProcessResult<()> {
        tokio::fs::write(&self.path, pid.to_string())
            .await
            .map_err(|e| ProcessError::pid_file(self.path.display().to_string(), e.to_string()))?;

        debug!("Wrote pid {} to {}", pid, self.path.display());
        Ok(())
    }

    /// Read the recorded pid.
    ///
    /// Returns `Ok(None)` when the file does not exist or records pid 0.
    /// Unparsable content is an error so callers can log it before treating
    /// it as "no pid".
    pub async fn read(&self) -> ProcessResult<Option<u32>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No pid file at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(ProcessError::pid_file(
                    self.path.display().to_string(),
                    e.to_string(),
                ))
            }
        };

        let pid = content.trim().parse::<u32>().map_err(|e| {
            ProcessError::pid_file(
                self.path.display().to_string(),
                format!("invalid pid {:?}: {}", content.trim(), e),
            )
        })?;

        Ok((pid != 0).then_some(pid))
    }

    /// Single deletion attempt.
    ///
    /// Returns `Ok(true)` when the file was removed and `Ok(false)` when there
    /// was nothing to remove. Any other failure (typically a transient sharing
    /// violation) is returned so the caller can retry.
    pub fn remove(&self) -> ProcessResult<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Deleted pid file {}", self.path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => {
                warn!("Could not delete pid file {}: {}", self.path.display(), e);
                Err(ProcessError::pid_file(
                    self.path.display().to_string(),
                    e.to_string(),
                ))
            }
        }
    }
}
