//! The `start` subcommand: run the instance as a service under the platform host.

use anyhow::{Context, Result};
use dsvc_service_management::ServiceHelper;
use std::path::PathBuf;

pub fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build the async runtime")
}

/// Run in a console: Ctrl+C or SIGTERM stop the server.
#[cfg(not(windows))]
pub fn run_service(helper: ServiceHelper, instance_dir: PathBuf) -> Result<i32> {
    use dsvc_service_lifecycle::ConsoleServiceHost;
    use dsvc_service_management::CommandOutcome;
    use std::sync::Arc;

    let runtime = build_runtime()?;
    let outcome = runtime.block_on(helper.start(&instance_dir, Arc::new(ConsoleServiceHost)));
    Ok(outcome.exit_code())
}

#[cfg(windows)]
pub use scm::run_service;

#[cfg(windows)]
mod scm {
    use super::*;
    use dsvc_common::ServiceName;
    use dsvc_service_lifecycle::{
        EventSink, LifecycleEvent, ScmServiceHost, ServiceOutcome, TracingEventSink,
    };
    use dsvc_service_management::{CommandOutcome, StartOutcome};
    use std::ffi::OsString;
    use std::sync::{Arc, OnceLock};
    use tracing::{error, info};
    use windows_service::{define_windows_service, service_dispatcher};

    struct ServiceRun {
        helper: ServiceHelper,
        name: ServiceName,
        instance_dir: PathBuf,
    }

    static SERVICE_RUN: OnceLock<ServiceRun> = OnceLock::new();
    static SERVICE_OUTCOME: OnceLock<ServiceOutcome> = OnceLock::new();

    define_windows_service!(ffi_service_main, service_main);

    fn service_main(_arguments: Vec<OsString>) {
        let Some(run) = SERVICE_RUN.get() else {
            error!("Service main called without a service to run");
            return;
        };

        let runtime = match build_runtime() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("{:#}", e);
                return;
            }
        };

        let controller = run
            .helper
            .controller(run.name.clone(), &run.instance_dir, Arc::new(ScmServiceHost));
        let outcome = runtime.block_on(controller.run());
        info!("Service {} ended: {:?}", run.name, outcome);
        let _ = SERVICE_OUTCOME.set(outcome);
    }

    /// Hand the process to the service control dispatcher. Returns once the
    /// service has stopped.
    pub fn run_service(helper: ServiceHelper, instance_dir: PathBuf) -> Result<i32> {
        let name = match helper.service_name_for(&instance_dir) {
            Ok(Some(name)) => name,
            Ok(None) => {
                error!("{} is not registered as a service", instance_dir.display());
                return Ok(StartOutcome::NotRegistered.exit_code());
            }
            Err(e) => {
                error!("Could not read the service list: {}", e);
                return Ok(StartOutcome::Failed {
                    reason: e.to_string(),
                }
                .exit_code());
            }
        };

        let events = TracingEventSink::new(instance_dir.display());
        let run = ServiceRun {
            helper,
            name: name.clone(),
            instance_dir,
        };
        if SERVICE_RUN.set(run).is_err() {
            anyhow::bail!("Service {} is already running in this process", name);
        }

        info!("Connecting service {} to the service control manager", name);
        match service_dispatcher::start(name.as_str(), ffi_service_main) {
            Ok(()) => {
                let outcome = SERVICE_OUTCOME.get().cloned().unwrap_or(ServiceOutcome::Stopped);
                Ok(StartOutcome::Ran(outcome).exit_code())
            }
            Err(e) => {
                let reason = format!("could not connect to the service control manager: {}", e);
                error!("Service {}: {}", name, reason);
                events.emit(LifecycleEvent::StartFailed { reason });
                Ok(StartOutcome::Failed {
                    reason: e.to_string(),
                }
                .exit_code())
            }
        }
    }
}
