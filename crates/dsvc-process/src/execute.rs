//! Process spawning.

use crate::command_line::build_command_line;
use dsvc_common::{ProcessError, ProcessResult};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// A freshly spawned process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub command_line: String,
    /// Exit code when the process was already gone right after creation.
    pub exit_code: Option<i32>,
}

impl ProcessHandle {
    pub fn exited_immediately(&self) -> bool {
        self.exit_code.is_some()
    }
}

/// Spawn `argv` as a child process.
///
/// The command line is built with [`build_command_line`] and rejected with
/// `SpawnFailed` when it is longer than `max_command_line`. A background
/// process is detached from our console and process group so it survives
/// the helper. The child is not waited for; must be called within a tokio
/// runtime so the exit status is reaped.
pub fn spawn_process<S: AsRef<str>>(
    argv: &[S],
    background: bool,
    max_command_line: usize,
) -> ProcessResult<ProcessHandle> {
    let command_line = build_command_line(argv);

    let Some(program) = argv.first().map(|s| s.as_ref().trim_matches('"').to_string()) else {
        return Err(ProcessError::spawn_failed("", "empty argument vector"));
    };

    if command_line.chars().count() > max_command_line {
        return Err(ProcessError::spawn_failed(
            &command_line,
            format!("command line exceeds {} characters", max_command_line),
        ));
    }

    let mut cmd = Command::new(&program);
    cmd.stdin(Stdio::null()).kill_on_drop(false);

    #[cfg(windows)]
    {
        // Hand the remaining tokens over exactly as built
        let tail = build_command_line(&argv[1..]);
        if !tail.is_empty() {
            cmd.raw_arg(tail);
        }

        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        let flags = if background {
            DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP
        } else {
            CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP
        };
        cmd.creation_flags(flags);
    }

    #[cfg(unix)]
    {
        cmd.args(argv[1..].iter().map(|s| s.as_ref()));
        if background {
            cmd.process_group(0);
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
    }

    debug!("Spawning '{}' (background: {})", command_line, background);

    let mut child = cmd
        .spawn()
        .map_err(|e| ProcessError::spawn_failed(&command_line, e.to_string()))?;

    let Some(pid) = child.id() else {
        return Err(ProcessError::spawn_failed(
            &command_line,
            "process exited before its id could be read",
        ));
    };

    let exit_code = match child.try_wait() {
        Ok(Some(status)) => {
            warn!("Process {} exited immediately with {}", pid, status);
            Some(status.code().unwrap_or(-1))
        }
        Ok(None) => None,
        Err(e) => {
            warn!("Could not query status of process {}: {}", pid, e);
            None
        }
    };

    debug!("Spawned pid {} for '{}'", pid, command_line);
    Ok(ProcessHandle {
        pid,
        command_line,
        exit_code,
    })
}
