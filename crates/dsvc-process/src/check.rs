//! Process exit checking.

use dsvc_common::{ProcessError, ProcessResult};

/// Check whether the process with the given PID has exited.
///
/// On Unix a child of ours that has exited but not been reaped still
/// answers `kill(pid, 0)`, so we try to reap it first. On Windows the exit
/// code is queried; a process that can no longer be opened has exited.
pub fn has_exited(pid: u32) -> ProcessResult<bool> {
    #[cfg(unix)]
    {
        has_exited_unix(pid)
    }

    #[cfg(windows)]
    {
        has_exited_windows(pid)
    }
}

#[cfg(unix)]
fn has_exited_unix(pid: u32) -> ProcessResult<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
    use nix::unistd::Pid;

    let nix_pid = Pid::from_raw(pid as i32);

    match waitpid(nix_pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => return Ok(false),
        Ok(_) => return Ok(true),
        // Not our child (or already reaped): fall back to a signal probe
        Err(Errno::ECHILD) => {}
        Err(e) => return Err(ProcessError::terminate_failed(pid, format!("waitpid failed: {}", e))),
    }

    match kill(nix_pid, None) {
        Ok(_) => Ok(false),
        Err(Errno::ESRCH) => Ok(true),
        Err(Errno::EPERM) => Ok(false), // Exists, owned by someone else
        Err(e) => Err(ProcessError::terminate_failed(pid, format!("failed to check process: {}", e))),
    }
}

#[cfg(windows)]
fn has_exited_windows(pid: u32) -> ProcessResult<bool> {
    use windows::Win32::Foundation::{CloseHandle, STILL_ACTIVE};
    use windows::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    unsafe {
        let handle = match OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) {
            Ok(h) => h,
            Err(_) => return Ok(true),
        };

        let mut exit_code = 0u32;
        let result = GetExitCodeProcess(handle, &mut exit_code);
        let _ = CloseHandle(handle);

        result.map_err(|e| {
            ProcessError::terminate_failed(pid, format!("GetExitCodeProcess failed: {}", e))
        })?;
        Ok(exit_code != STILL_ACTIVE.0 as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_has_not_exited() {
        assert!(!has_exited(std::process::id()).unwrap());
    }

    #[test]
    #[cfg(unix)]
    fn test_reaped_child_has_exited() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(has_exited(pid).unwrap());
    }

    #[test]
    #[cfg(unix)]
    fn test_unreaped_child_is_reaped() {
        let child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        std::thread::sleep(std::time::Duration::from_millis(200));
        assert!(has_exited(pid).unwrap());
    }
}
