//! Subcommands of the service helper and their exit codes.
//!
//! Every subcommand resolves to an outcome enum; the binary prints what it
//! needs to and exits with [`CommandOutcome::exit_code`].

use crate::config::ServiceHelperConfig;
use dsvc_common::{ServerInstance, ServiceError, ServiceName, ServiceResult};
use dsvc_process::{LaunchOutcome, ProcessSupervisor, StopOutcome};
use dsvc_process_file::{Liveness, LivenessCheck, LockFileProbe};
use dsvc_service_lifecycle::{ScriptLauncher, ServiceHost, ServiceLifecycleController, ServiceOutcome};
use dsvc_service_registry::{Removal, ServiceManager, ServiceRegistry};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Maps the result of a subcommand to the process exit code.
pub trait CommandOutcome {
    fn exit_code(&self) -> i32;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created { name: ServiceName },
    /// The instance is already registered; nothing was created.
    AlreadyExists { name: String },
    /// The service manager rejected the name as a duplicate.
    DuplicateName { name: String },
    Failed { reason: String },
}

impl CommandOutcome for CreateOutcome {
    fn exit_code(&self) -> i32 {
        match self {
            CreateOutcome::Created { .. } => 0,
            CreateOutcome::AlreadyExists { .. } => 1,
            CreateOutcome::DuplicateName { .. } => 2,
            CreateOutcome::Failed { .. } => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateOutcome {
    Registered { name: ServiceName },
    NotRegistered,
    Failed { reason: String },
}

impl CommandOutcome for StateOutcome {
    fn exit_code(&self) -> i32 {
        match self {
            StateOutcome::Registered { .. } => 0,
            StateOutcome::NotRegistered => 1,
            StateOutcome::Failed { .. } => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed { name: ServiceName },
    NotFound,
    /// Deletion completes once every handle to the service is closed.
    MarkedForDeletion { name: ServiceName },
    Failed { reason: String },
}

impl CommandOutcome for RemoveOutcome {
    fn exit_code(&self) -> i32 {
        match self {
            RemoveOutcome::Removed { .. } => 0,
            RemoveOutcome::NotFound => 1,
            RemoveOutcome::MarkedForDeletion { .. } => 2,
            RemoveOutcome::Failed { .. } => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunningOutcome {
    Running,
    NotRunning,
    Unknown { reason: String },
}

impl CommandOutcome for RunningOutcome {
    fn exit_code(&self) -> i32 {
        match self {
            RunningOutcome::Running => 0,
            RunningOutcome::NotRunning => 1,
            RunningOutcome::Unknown { .. } => 2,
        }
    }
}

impl fmt::Display for RunningOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunningOutcome::Running => write!(f, "running"),
            RunningOutcome::NotRunning => write!(f, "not running"),
            RunningOutcome::Unknown { reason } => write!(f, "unknown: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The controller ran; the service outcome says how it ended.
    Ran(ServiceOutcome),
    NotRegistered,
    Failed { reason: String },
}

impl CommandOutcome for StartOutcome {
    fn exit_code(&self) -> i32 {
        match self {
            StartOutcome::Ran(ServiceOutcome::RegistrationFailed { .. }) => 1,
            StartOutcome::Ran(_) => 0,
            StartOutcome::NotRegistered | StartOutcome::Failed { .. } => 1,
        }
    }
}

impl CommandOutcome for LaunchOutcome {
    fn exit_code(&self) -> i32 {
        match self {
            LaunchOutcome::Launched { .. } => 0,
            LaunchOutcome::SpawnFailed { .. } => 1,
            LaunchOutcome::PidNotRecorded { .. } => 2,
        }
    }
}

impl CommandOutcome for StopOutcome {
    fn exit_code(&self) -> i32 {
        match self {
            StopOutcome::Stopped { .. } => 0,
            StopOutcome::NothingToStop => 1,
            StopOutcome::TerminateFailed { .. }
            | StopOutcome::StillRunning { .. }
            | StopOutcome::Unconfirmed { .. } => 2,
            StopOutcome::PidFileNotDeleted { .. } => 3,
        }
    }
}

/// The command surface of the helper for one configuration.
pub struct ServiceHelper {
    config: ServiceHelperConfig,
    executable: PathBuf,
    registry: ServiceRegistry,
    supervisor: Arc<ProcessSupervisor>,
}

impl ServiceHelper {
    /// Helper whose registrations point at `executable`.
    pub fn new(
        config: ServiceHelperConfig,
        executable: impl Into<PathBuf>,
        manager: Arc<dyn ServiceManager>,
    ) -> Self {
        let registry = ServiceRegistry::new(manager, config.registry.settings());
        let supervisor = Arc::new(ProcessSupervisor::new(config.supervisor.settings()));
        Self::with_parts(config, executable, registry, supervisor)
    }

    pub fn with_parts(
        config: ServiceHelperConfig,
        executable: impl Into<PathBuf>,
        registry: ServiceRegistry,
        supervisor: Arc<ProcessSupervisor>,
    ) -> Self {
        Self {
            config,
            executable: executable.into(),
            registry,
            supervisor,
        }
    }

    pub fn config(&self) -> &ServiceHelperConfig {
        &self.config
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn instance(&self, instance_dir: &Path) -> ServerInstance {
        self.config.instance(instance_dir)
    }

    /// Command line the service manager runs for `instance_dir`.
    pub fn service_command(&self, instance_dir: &Path) -> String {
        format!(
            "\"{}\" start \"{}\"",
            self.executable.display(),
            instance_dir.display()
        )
    }

    /// Name under which `instance_dir` is registered, if any.
    pub fn service_name_for(&self, instance_dir: &Path) -> ServiceResult<Option<ServiceName>> {
        self.registry
            .find_service_name(&self.service_command(instance_dir))
    }

    /// Register `instance_dir` under a unique name derived from `display_name`.
    pub fn create(&self, instance_dir: &Path, display_name: &str, description: &str) -> CreateOutcome {
        let command = self.service_command(instance_dir);
        debug!("Creating service for command {}", command);

        match self.registry.install(display_name, description, &command) {
            Ok(name) => {
                info!("Service '{}' created for {}", name, instance_dir.display());
                CreateOutcome::Created { name }
            }
            Err(ServiceError::AlreadyExists { name }) => {
                info!("{} is already registered as '{}'", instance_dir.display(), name);
                CreateOutcome::AlreadyExists { name }
            }
            Err(ServiceError::NameConflict { name }) => {
                error!("Service name '{}' is already in use", name);
                CreateOutcome::DuplicateName { name }
            }
            Err(e) => {
                error!("Could not create service for {}: {}", instance_dir.display(), e);
                CreateOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn state(&self, instance_dir: &Path) -> StateOutcome {
        match self.service_name_for(instance_dir) {
            Ok(Some(name)) => StateOutcome::Registered { name },
            Ok(None) => StateOutcome::NotRegistered,
            Err(e) => {
                error!("Could not read the service list: {}", e);
                StateOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Remove the registration of `instance_dir`.
    pub async fn remove(&self, instance_dir: &Path) -> RemoveOutcome {
        match self.service_name_for(instance_dir) {
            Ok(Some(name)) => self.cleanup(&name).await,
            Ok(None) => {
                info!("{} is not registered", instance_dir.display());
                RemoveOutcome::NotFound
            }
            Err(e) => {
                error!("Could not read the service list: {}", e);
                RemoveOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Remove the registration called `name`.
    pub async fn cleanup(&self, name: &ServiceName) -> RemoveOutcome {
        match self.registry.uninstall(name).await {
            Ok(Removal::Deleted) => RemoveOutcome::Removed { name: name.clone() },
            Ok(Removal::MarkedForDeletion) => {
                warn!("Service '{}' is marked for deletion", name);
                RemoveOutcome::MarkedForDeletion { name: name.clone() }
            }
            Err(ServiceError::NotFound { .. }) => RemoveOutcome::NotFound,
            Err(e) => RemoveOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }

    pub fn is_running(&self, instance_dir: &Path) -> RunningOutcome {
        let instance = self.instance(instance_dir);
        match LockFileProbe::for_instance(&instance).check() {
            Ok(Liveness::Running) => RunningOutcome::Running,
            Ok(Liveness::NotRunning) => RunningOutcome::NotRunning,
            Err(e) => {
                warn!("Could not tell whether {} is running: {}", instance, e);
                RunningOutcome::Unknown {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Launch the configured start command in the background.
    pub async fn launch(&self, instance_dir: &Path) -> LaunchOutcome {
        let instance = self.instance(instance_dir);
        let argv = self.config.commands.start_argv(&instance);
        self.supervisor.start_server(&instance, &argv).await
    }

    /// Stop the server recorded in the PID file.
    pub async fn stop(&self, instance_dir: &Path) -> StopOutcome {
        let instance = self.instance(instance_dir);
        let probe = LockFileProbe::for_instance(&instance);
        self.supervisor.stop_server(&instance, &probe).await
    }

    /// Controller for the service `name` of `instance_dir`, hosted by `host`.
    pub fn controller(
        &self,
        name: ServiceName,
        instance_dir: &Path,
        host: Arc<dyn ServiceHost>,
    ) -> ServiceLifecycleController {
        let instance = self.instance(instance_dir);
        let launcher = ScriptLauncher::new(
            self.supervisor.clone(),
            self.config.commands.start_argv(&instance),
            self.config.commands.stop_argv(&instance),
        );
        let probe = LockFileProbe::for_instance(&instance);
        ServiceLifecycleController::new(
            name,
            instance,
            self.config.lifecycle.settings(),
            host,
            Arc::new(launcher),
            Arc::new(probe),
        )
    }

    /// Run the registered service of `instance_dir` under `host` until it stops.
    pub async fn start(&self, instance_dir: &Path, host: Arc<dyn ServiceHost>) -> StartOutcome {
        let name = match self.service_name_for(instance_dir) {
            Ok(Some(name)) => name,
            Ok(None) => {
                error!("{} is not registered as a service", instance_dir.display());
                return StartOutcome::NotRegistered;
            }
            Err(e) => {
                error!("Could not read the service list: {}", e);
                return StartOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let outcome = self.controller(name, instance_dir, host).run().await;
        info!("Service run for {} ended: {:?}", instance_dir.display(), outcome);
        StartOutcome::Ran(outcome)
    }
}
