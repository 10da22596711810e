//! Byte-range lock on the server lock file.
//!
//! A running server claims byte 0 (length 1) of `locks/server.lock` with an
//! exclusive record lock. On Unix that is an `fcntl(F_SETLK)` lock, the kind
//! the server's runtime takes; a whole-file `flock` does not see it on Linux.
//! Windows uses `LockFileEx` on the same range.
//!
//! Unix record locks belong to the process: a lock this process already
//! holds never shows up as contended, and closing any descriptor of the
//! file drops it.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Result of a non-blocking lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired,
    /// Another process holds the range.
    Contended,
}

/// Try to take the exclusive lock on byte 0 of `file` without blocking.
pub fn try_lock_byte(file: &File) -> io::Result<LockAttempt> {
    sys::try_lock(file)
}

/// Release a lock taken with [`try_lock_byte`].
pub fn unlock_byte(file: &File) -> io::Result<()> {
    sys::unlock(file)
}

/// An exclusive claim on a lock file, held until dropped.
#[derive(Debug)]
pub struct ServerLock {
    file: File,
    path: PathBuf,
}

impl ServerLock {
    /// Claim the lock at `path`, creating the file if needed.
    ///
    /// Returns `Ok(None)` when another process holds it.
    pub fn try_acquire(path: impl Into<PathBuf>) -> io::Result<Option<Self>> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match try_lock_byte(&file)? {
            LockAttempt::Acquired => {
                debug!("Acquired server lock {}", path.display());
                Ok(Some(Self { file, path }))
            }
            LockAttempt::Contended => Ok(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ServerLock {
    fn drop(&mut self) {
        if let Err(e) = unlock_byte(&self.file) {
            warn!("Failed to release {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(unix)]
mod sys {
    use super::LockAttempt;
    use nix::errno::Errno;
    use nix::fcntl::{fcntl, FcntlArg};
    use nix::libc;
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    fn first_byte(l_type: i32) -> libc::flock {
        // SAFETY: flock is plain old data; all zeroes is a valid value
        let mut lock: libc::flock = unsafe { std::mem::zeroed() };
        lock.l_type = l_type as _;
        lock.l_whence = libc::SEEK_SET as _;
        lock.l_start = 0;
        lock.l_len = 1;
        lock
    }

    pub fn try_lock(file: &File) -> io::Result<LockAttempt> {
        let lock = first_byte(libc::F_WRLCK as i32);
        match fcntl(file.as_raw_fd(), FcntlArg::F_SETLK(&lock)) {
            Ok(_) => Ok(LockAttempt::Acquired),
            // POSIX allows either for a conflicting lock
            Err(Errno::EAGAIN) | Err(Errno::EACCES) => Ok(LockAttempt::Contended),
            Err(e) => Err(io::Error::from(e)),
        }
    }

    pub fn unlock(file: &File) -> io::Result<()> {
        let lock = first_byte(libc::F_UNLCK as i32);
        fcntl(file.as_raw_fd(), FcntlArg::F_SETLK(&lock))
            .map(|_| ())
            .map_err(io::Error::from)
    }
}

#[cfg(windows)]
mod sys {
    use super::LockAttempt;
    use std::fs::File;
    use std::io;
    use std::os::windows::io::AsRawHandle;
    use windows::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
    use windows::Win32::Storage::FileSystem::{
        LockFileEx, UnlockFile, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };
    use windows::Win32::System::IO::OVERLAPPED;

    pub fn try_lock(file: &File) -> io::Result<LockAttempt> {
        let handle = HANDLE(file.as_raw_handle());
        // The zeroed OVERLAPPED carries offset 0
        let mut overlapped = OVERLAPPED::default();
        let result = unsafe {
            LockFileEx(
                handle,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                1,
                0,
                &mut overlapped,
            )
        };
        match result {
            Ok(()) => Ok(LockAttempt::Acquired),
            Err(e) if e.code() == ERROR_LOCK_VIOLATION.to_hresult() => Ok(LockAttempt::Contended),
            Err(e) => Err(io::Error::from(e)),
        }
    }

    pub fn unlock(file: &File) -> io::Result<()> {
        let handle = HANDLE(file.as_raw_handle());
        unsafe { UnlockFile(handle, 0, 0, 1, 0) }.map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_server_lock_creates_file_and_releases_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.lock");

        let lock = ServerLock::try_acquire(&path).unwrap().unwrap();
        assert!(path.exists());
        assert_eq!(lock.path(), path);
        drop(lock);

        let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        assert_eq!(try_lock_byte(&file).unwrap(), LockAttempt::Acquired);
        unlock_byte(&file).unwrap();
    }
}
