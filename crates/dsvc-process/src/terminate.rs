//! Process termination primitives.

use crate::check::has_exited;
use dsvc_common::{ProcessError, ProcessResult};

/// Operations the supervisor needs to end a process.
///
/// Split out so termination can be exercised without killing real processes.
pub trait ProcessSignaller: Send + Sync {
    /// Ask the OS to terminate `pid`.
    ///
    /// Returns `Ok(false)` when the process could not be opened at all, which
    /// callers treat as already terminated.
    fn request_termination(&self, pid: u32) -> ProcessResult<bool>;

    fn has_exited(&self, pid: u32) -> ProcessResult<bool>;
}

/// Signaller backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessSignaller;

impl ProcessSignaller for OsProcessSignaller {
    fn request_termination(&self, pid: u32) -> ProcessResult<bool> {
        force_kill(pid)
    }

    fn has_exited(&self, pid: u32) -> ProcessResult<bool> {
        has_exited(pid)
    }
}

/// Force kill a process (SIGKILL on Unix, TerminateProcess on Windows).
///
/// Returns `Ok(false)` when no such process could be opened.
pub fn force_kill(pid: u32) -> ProcessResult<bool> {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(e) => Err(ProcessError::terminate_failed(pid, e.to_string())),
        }
    }

    #[cfg(windows)]
    {
        use windows::Win32::Foundation::CloseHandle;
        use windows::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};

        unsafe {
            let handle = match OpenProcess(PROCESS_TERMINATE, false, pid) {
                Ok(h) if !h.is_invalid() => h,
                _ => return Ok(false),
            };

            let result = TerminateProcess(handle, 1);
            let _ = CloseHandle(handle);

            result
                .map(|_| true)
                .map_err(|e| ProcessError::terminate_failed(pid, format!("TerminateProcess failed: {}", e)))
        }
    }
}
