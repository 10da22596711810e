//! Core domain types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Default PID file location, relative to the instance directory.
pub const DEFAULT_PID_FILE: &str = "logs/server.pid";

/// Default lock file location, relative to the instance directory.
pub const DEFAULT_LOCK_FILE: &str = "locks/server.lock";

/// A directory server instance, identified by its instance directory.
///
/// Nothing is persisted for an instance: the PID file and lock file paths
/// are derived from the directory every time they are needed.
///
/// # Example
/// ```
/// use dsvc_common::ServerInstance;
/// use std::path::Path;
///
/// let instance = ServerInstance::new("/srv/ds1");
/// assert_eq!(instance.pid_file(), Path::new("/srv/ds1/logs/server.pid"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerInstance {
    instance_dir: PathBuf,
    pid_file: PathBuf,
    lock_file: PathBuf,
}

impl ServerInstance {
    /// Creates an instance with the default file layout.
    pub fn new(instance_dir: impl Into<PathBuf>) -> Self {
        Self::with_layout(instance_dir, DEFAULT_PID_FILE, DEFAULT_LOCK_FILE)
    }

    /// Creates an instance with custom PID and lock file locations.
    /// Relative locations are resolved against the instance directory.
    pub fn with_layout(
        instance_dir: impl Into<PathBuf>,
        pid_file: impl AsRef<Path>,
        lock_file: impl AsRef<Path>,
    ) -> Self {
        let instance_dir = instance_dir.into();
        let pid_file = instance_dir.join(pid_file);
        let lock_file = instance_dir.join(lock_file);
        Self {
            instance_dir,
            pid_file,
            lock_file,
        }
    }

    pub fn instance_dir(&self) -> &Path {
        &self.instance_dir
    }

    /// `<instanceDir>/logs/server.pid` unless overridden.
    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// `<instanceDir>/locks/server.lock` unless overridden.
    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }

    /// Resolves a path relative to the instance directory.
    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.instance_dir.join(relative)
    }
}

impl fmt::Display for ServerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.instance_dir.display())
    }
}

/// Name of a registration in the OS service database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceName(String);

impl ServiceName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The candidate name for the given attempt: `base` first, then `base-2`, `base-3`, ...
    pub fn with_suffix(base: &str, attempt: u32) -> Self {
        if attempt <= 1 {
            Self(base.to_string())
        } else {
            Self(format!("{}-{}", base, attempt))
        }
    }
}

impl From<&str> for ServiceName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ServiceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
