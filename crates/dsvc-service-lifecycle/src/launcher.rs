//! Running the server's own start and stop commands.

use async_trait::async_trait;
use dsvc_common::ProcessResult;
use dsvc_process::ProcessSupervisor;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Asks the server to start or stop. Neither call waits for the outcome;
/// the controller confirms it through the liveness probe.
#[async_trait]
pub trait ServerLauncher: Send + Sync {
    async fn start_server(&self) -> ProcessResult<()>;

    async fn stop_server(&self) -> ProcessResult<()>;
}

/// Launcher running the instance's start and stop scripts.
pub struct ScriptLauncher {
    supervisor: Arc<ProcessSupervisor>,
    start_command: Vec<String>,
    stop_command: Vec<String>,
}

impl ScriptLauncher {
    /// `start_command` and `stop_command` are complete argument vectors.
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        start_command: Vec<String>,
        stop_command: Vec<String>,
    ) -> Self {
        Self {
            supervisor,
            start_command,
            stop_command,
        }
    }

    fn run(&self, argv: &[String]) -> ProcessResult<()> {
        let handle = self.supervisor.spawn(argv, false)?;
        match handle.exit_code {
            Some(0) => debug!("'{}' already finished", handle.command_line),
            Some(code) => warn!("'{}' exited immediately with {}", handle.command_line, code),
            None => debug!("'{}' running as pid {}", handle.command_line, handle.pid),
        }
        Ok(())
    }
}

#[async_trait]
impl ServerLauncher for ScriptLauncher {
    async fn start_server(&self) -> ProcessResult<()> {
        info!("Running start command");
        self.run(&self.start_command)
    }

    async fn stop_server(&self) -> ProcessResult<()> {
        info!("Running stop command");
        self.run(&self.stop_command)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use dsvc_common::ProcessError;

    #[tokio::test]
    async fn test_script_launcher_spawns_commands() {
        let launcher = ScriptLauncher::new(
            Arc::new(ProcessSupervisor::default()),
            vec!["true".to_string()],
            vec!["/nonexistent/stop-ds".to_string()],
        );

        assert!(launcher.start_server().await.is_ok());
        assert!(matches!(
            launcher.stop_server().await,
            Err(ProcessError::SpawnFailed { .. })
        ));
    }
}
