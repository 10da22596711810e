//! ProcessSupervisor - spawn, PID bookkeeping and termination of the server.
//!
//! The supervisor never decides liveness on its own: after terminating a
//! process it asks a [`LivenessCheck`] whether the server actually went
//! away. Bookkeeping failures (PID file write/delete) are logged and reported
//! through the outcome types; they never abort a start or a stop.

use crate::command_line::DEFAULT_MAX_COMMAND_LINE;
use crate::execute::{spawn_process, ProcessHandle};
use crate::terminate::{OsProcessSignaller, ProcessSignaller};
use dsvc_common::{poll_until, Clock, PollOutcome, PollPolicy, ProcessResult, ServerInstance, TokioClock};
use dsvc_process_file::{Liveness, LivenessCheck, PidFile};
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Timing and size limits of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub max_command_line: usize,
    pub pid_delete: PollPolicy,
    pub terminate: PollPolicy,
    pub stop_confirm: PollPolicy,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            max_command_line: DEFAULT_MAX_COMMAND_LINE,
            pid_delete: PollPolicy::immediate(Duration::from_millis(500), 10),
            terminate: PollPolicy::immediate(Duration::from_secs(1), 20),
            stop_confirm: PollPolicy::immediate(Duration::from_secs(2), 10),
        }
    }
}

/// Result of [`ProcessSupervisor::start_server`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    Launched { pid: u32 },
    /// The process runs but its pid could not be recorded.
    PidNotRecorded { pid: u32 },
    SpawnFailed { reason: String },
}

/// Result of [`ProcessSupervisor::stop_server`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { pid: u32 },
    /// No pid recorded: nothing was terminated.
    NothingToStop,
    TerminateFailed { pid: u32 },
    /// Terminated, but the probe still reports the server as running.
    StillRunning { pid: u32 },
    /// Terminated, but liveness could not be determined.
    Unconfirmed { pid: u32, reason: String },
    /// Stopped, but the pid file is still on disk.
    PidFileNotDeleted { pid: u32 },
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOutcome::Stopped { pid } => write!(f, "process {} stopped", pid),
            StopOutcome::NothingToStop => write!(f, "no pid recorded, nothing to stop"),
            StopOutcome::TerminateFailed { pid } => write!(f, "could not terminate process {}", pid),
            StopOutcome::StillRunning { pid } => {
                write!(f, "process {} terminated but the server is still running", pid)
            }
            StopOutcome::Unconfirmed { pid, reason } => {
                write!(f, "process {} terminated but liveness is unknown: {}", pid, reason)
            }
            StopOutcome::PidFileNotDeleted { pid } => {
                write!(f, "process {} stopped but its pid file could not be deleted", pid)
            }
        }
    }
}

/// Supervises the server process of an instance.
pub struct ProcessSupervisor {
    settings: SupervisorSettings,
    clock: Arc<dyn Clock>,
    signaller: Arc<dyn ProcessSignaller>,
}

impl ProcessSupervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self::with_parts(settings, Arc::new(TokioClock), Arc::new(OsProcessSignaller))
    }

    pub fn with_parts(
        settings: SupervisorSettings,
        clock: Arc<dyn Clock>,
        signaller: Arc<dyn ProcessSignaller>,
    ) -> Self {
        Self {
            settings,
            clock,
            signaller,
        }
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Spawn `argv`; see [`spawn_process`].
    pub fn spawn<S: AsRef<str>>(&self, argv: &[S], background: bool) -> ProcessResult<ProcessHandle> {
        spawn_process(argv, background, self.settings.max_command_line)
    }

    /// Record `pid` in the instance PID file. Failure is logged, not raised.
    pub async fn write_pid_file(&self, instance: &ServerInstance, pid: u32) -> bool {
        match PidFile::for_instance(instance).write(pid).await {
            Ok(()) => true,
            Err(e) => {
                error!("Could not record pid {}: {}", pid, e);
                false
            }
        }
    }

    /// The recorded pid, or `None` when absent, zero or unreadable.
    pub async fn read_pid(&self, instance: &ServerInstance) -> Option<u32> {
        match PidFile::for_instance(instance).read().await {
            Ok(pid) => pid,
            Err(e) => {
                warn!("Ignoring unreadable pid file: {}", e);
                None
            }
        }
    }

    /// Delete the PID file, retrying while the OS keeps it locked.
    ///
    /// A PID file that is already gone counts as deleted.
    pub async fn delete_pid_file(&self, instance: &ServerInstance) -> bool {
        let pid_file = PidFile::for_instance(instance);
        let outcome = poll_until(&self.settings.pid_delete, self.clock.as_ref(), |attempt| {
            Ok::<_, Infallible>(match pid_file.remove() {
                Ok(_) => Some(()),
                Err(e) => {
                    debug!("Pid file delete attempt {} failed: {}", attempt, e);
                    None
                }
            })
        })
        .await;

        match outcome {
            Ok(PollOutcome::Ready { .. }) => true,
            Ok(PollOutcome::Exhausted { attempts }) => {
                error!(
                    "Could not delete {} after {} attempts",
                    pid_file.path().display(),
                    attempts
                );
                false
            }
            Err(never) => match never {},
        }
    }

    /// Terminate `pid` and wait for it to exit.
    ///
    /// A process that cannot be opened is treated as already terminated.
    pub async fn terminate(&self, pid: u32) -> bool {
        if pid == 0 {
            warn!("Refusing to terminate pid 0");
            return false;
        }

        match self.signaller.request_termination(pid) {
            Ok(true) => {}
            Ok(false) => {
                debug!("Process {} not found, treating as terminated", pid);
                return true;
            }
            Err(e) => {
                error!("Termination of {} failed: {}", pid, e);
                return false;
            }
        }

        let signaller = Arc::clone(&self.signaller);
        let outcome = poll_until(&self.settings.terminate, self.clock.as_ref(), |_| {
            signaller.has_exited(pid).map(|exited| exited.then_some(()))
        })
        .await;

        match outcome {
            Ok(PollOutcome::Ready { attempts, .. }) => {
                debug!("Process {} exited after {} checks", pid, attempts);
                true
            }
            Ok(PollOutcome::Exhausted { attempts }) => {
                error!("Process {} still alive after {} checks", pid, attempts);
                false
            }
            Err(e) => {
                error!("Could not check process {}: {}", pid, e);
                false
            }
        }
    }

    /// Launch the server in the background and record its pid.
    pub async fn start_server<S: AsRef<str>>(
        &self,
        instance: &ServerInstance,
        argv: &[S],
    ) -> LaunchOutcome {
        let handle = match self.spawn(argv, true) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Could not launch server for {}: {}", instance, e);
                return LaunchOutcome::SpawnFailed {
                    reason: e.to_string(),
                };
            }
        };

        if let Some(code) = handle.exit_code {
            warn!("Server launcher {} exited immediately with {}", handle.pid, code);
        }

        if self.write_pid_file(instance, handle.pid).await {
            info!("Server launched for {} with pid {}", instance, handle.pid);
            LaunchOutcome::Launched { pid: handle.pid }
        } else {
            LaunchOutcome::PidNotRecorded { pid: handle.pid }
        }
    }

    /// Stop the recorded server process and confirm it is gone.
    pub async fn stop_server(
        &self,
        instance: &ServerInstance,
        probe: &dyn LivenessCheck,
    ) -> StopOutcome {
        let Some(pid) = self.read_pid(instance).await else {
            info!("No pid recorded for {}, nothing to stop", instance);
            return StopOutcome::NothingToStop;
        };

        if !self.terminate(pid).await {
            return StopOutcome::TerminateFailed { pid };
        }

        let confirmed = poll_until(&self.settings.stop_confirm, self.clock.as_ref(), |attempt| {
            probe.check().map(|liveness| {
                debug!("Stop confirmation {}: {}", attempt, liveness);
                (liveness == Liveness::NotRunning).then_some(())
            })
        })
        .await;

        match confirmed {
            Ok(PollOutcome::Ready { .. }) => {}
            Ok(PollOutcome::Exhausted { .. }) => {
                warn!("Server for {} still holds its lock", instance);
                return StopOutcome::StillRunning { pid };
            }
            Err(e) => {
                warn!("Could not confirm stop of {}: {}", instance, e);
                return StopOutcome::Unconfirmed {
                    pid,
                    reason: e.to_string(),
                };
            }
        }

        if self.delete_pid_file(instance).await {
            info!("Server {} for {} stopped", pid, instance);
            StopOutcome::Stopped { pid }
        } else {
            StopOutcome::PidFileNotDeleted { pid }
        }
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(SupervisorSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsvc_common::{ManualClock, ProcessError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Signaller that records calls and reports exit after a set number of checks.
    #[derive(Default)]
    struct FakeSignaller {
        missing: bool,
        exit_after: Option<u32>,
        terminated: Mutex<Vec<u32>>,
        checks: AtomicU32,
    }

    impl ProcessSignaller for FakeSignaller {
        fn request_termination(&self, pid: u32) -> ProcessResult<bool> {
            self.terminated.lock().unwrap().push(pid);
            Ok(!self.missing)
        }

        fn has_exited(&self, _pid: u32) -> ProcessResult<bool> {
            let n = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(self.exit_after.is_some_and(|after| n >= after))
        }
    }

    fn fixture(signaller: FakeSignaller) -> (TempDir, ServerInstance, Arc<ManualClock>, Arc<FakeSignaller>, ProcessSupervisor) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("logs")).unwrap();
        let instance = ServerInstance::new(dir.path());
        let clock = Arc::new(ManualClock::new());
        let signaller = Arc::new(signaller);
        let supervisor = ProcessSupervisor::with_parts(
            SupervisorSettings::default(),
            clock.clone(),
            signaller.clone(),
        );
        (dir, instance, clock, signaller, supervisor)
    }

    #[tokio::test]
    async fn test_stop_without_pid_does_not_terminate() {
        let (_dir, instance, _clock, signaller, supervisor) = fixture(FakeSignaller::default());
        let probe = || -> ProcessResult<Liveness> { panic!("probe must not run") };

        let outcome = supervisor.stop_server(&instance, &probe).await;

        assert_eq!(outcome, StopOutcome::NothingToStop);
        assert!(signaller.terminated.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_with_zero_pid_is_nothing_to_stop() {
        let (_dir, instance, _clock, signaller, supervisor) = fixture(FakeSignaller::default());
        std::fs::write(instance.pid_file(), "0").unwrap();
        let probe = || -> ProcessResult<Liveness> { Ok(Liveness::NotRunning) };

        assert_eq!(supervisor.stop_server(&instance, &probe).await, StopOutcome::NothingToStop);
        assert!(signaller.terminated.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_scenario() {
        let (_dir, instance, _clock, signaller, supervisor) = fixture(FakeSignaller {
            exit_after: Some(1),
            ..Default::default()
        });
        assert!(supervisor.write_pid_file(&instance, 4321).await);
        assert_eq!(supervisor.read_pid(&instance).await, Some(4321));

        let probe = || -> ProcessResult<Liveness> { Ok(Liveness::NotRunning) };
        let outcome = supervisor.stop_server(&instance, &probe).await;

        assert_eq!(outcome, StopOutcome::Stopped { pid: 4321 });
        assert_eq!(*signaller.terminated.lock().unwrap(), vec![4321]);
        assert!(!instance.pid_file().exists());
    }

    #[tokio::test]
    async fn test_stop_still_running_keeps_pid_file() {
        let (_dir, instance, clock, _signaller, supervisor) = fixture(FakeSignaller {
            exit_after: Some(1),
            ..Default::default()
        });
        supervisor.write_pid_file(&instance, 4321).await;

        let probe = || -> ProcessResult<Liveness> { Ok(Liveness::Running) };
        let outcome = supervisor.stop_server(&instance, &probe).await;

        assert_eq!(outcome, StopOutcome::StillRunning { pid: 4321 });
        assert!(instance.pid_file().exists());
        assert_eq!(clock.elapsed(), supervisor.settings().stop_confirm.worst_case());
    }

    #[tokio::test]
    async fn test_stop_probe_error_is_unconfirmed() {
        let (_dir, instance, _clock, _signaller, supervisor) = fixture(FakeSignaller {
            exit_after: Some(1),
            ..Default::default()
        });
        supervisor.write_pid_file(&instance, 4321).await;

        let probe = || -> ProcessResult<Liveness> { Err(ProcessError::probe_failed("server.lock", "gone")) };
        let outcome = supervisor.stop_server(&instance, &probe).await;

        assert!(matches!(outcome, StopOutcome::Unconfirmed { pid: 4321, .. }));
    }

    #[tokio::test]
    async fn test_terminate_missing_process_is_success() {
        let (_dir, _instance, clock, signaller, supervisor) = fixture(FakeSignaller {
            missing: true,
            ..Default::default()
        });

        assert!(supervisor.terminate(99).await);
        assert_eq!(signaller.checks.load(Ordering::SeqCst), 0);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_terminate_gives_up_after_twenty_checks() {
        let (_dir, _instance, clock, signaller, supervisor) = fixture(FakeSignaller::default());

        assert!(!supervisor.terminate(42).await);
        assert_eq!(signaller.checks.load(Ordering::SeqCst), 20);
        assert_eq!(clock.elapsed(), Duration::from_secs(19));
    }

    #[tokio::test]
    async fn test_terminate_zero_pid_is_rejected() {
        let (_dir, _instance, _clock, signaller, supervisor) = fixture(FakeSignaller::default());

        assert!(!supervisor.terminate(0).await);
        assert!(signaller.terminated.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_pid_file_without_logs_dir() {
        let dir = TempDir::new().unwrap();
        let instance = ServerInstance::new(dir.path());

        assert!(!ProcessSupervisor::default().write_pid_file(&instance, 4321).await);
    }

    #[tokio::test]
    async fn test_delete_missing_pid_file_is_success() {
        let (_dir, instance, clock, _signaller, supervisor) = fixture(FakeSignaller::default());

        assert!(supervisor.delete_pid_file(&instance).await);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_delete_pid_file_retries_are_bounded() {
        let (_dir, instance, clock, _signaller, supervisor) = fixture(FakeSignaller::default());
        // A directory where the pid file should be cannot be removed as a file
        std::fs::create_dir_all(instance.pid_file()).unwrap();

        assert!(!supervisor.delete_pid_file(&instance).await);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(500); 9]);
    }

    #[tokio::test]
    async fn test_start_server_spawn_failure() {
        let (_dir, instance, _clock, _signaller, supervisor) = fixture(FakeSignaller::default());

        let outcome = supervisor
            .start_server(&instance, &["/nonexistent/bin/start-ds", "--windowsNetStart"])
            .await;

        assert!(matches!(outcome, LaunchOutcome::SpawnFailed { .. }));
        assert!(!instance.pid_file().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_server_records_pid() {
        let (_dir, instance, _clock, _signaller, supervisor) = fixture(FakeSignaller::default());

        let outcome = supervisor.start_server(&instance, &["sleep", "5"]).await;

        let LaunchOutcome::Launched { pid } = outcome else {
            panic!("unexpected outcome: {outcome:?}");
        };
        assert_eq!(supervisor.read_pid(&instance).await, Some(pid));
        let _ = crate::terminate::force_kill(pid);
    }
}
