//! Service hosts: where control codes come from and where status goes.
//!
//! A [`ServiceHost`] registers the control handler for a service and hands
//! back the [`StatusReporter`] used for every status update. Control codes
//! are pushed into the controller's channel in delivery order; the
//! controller drains that channel serially.

use dsvc_common::{ServiceError, ServiceName, ServiceResult};
use dsvc_service_state::{ControlCode, ServiceState, ServiceStatusReport};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Sending half of the control channel.
pub type ControlSender = mpsc::UnboundedSender<ControlCode>;

/// Receiving half of the control channel, owned by the controller.
pub type ControlReceiver = mpsc::UnboundedReceiver<ControlCode>;

/// Sends status updates to the service manager.
pub trait StatusReporter: Send + Sync {
    fn report(&self, report: &ServiceStatusReport) -> ServiceResult<()>;
}

/// Registers the control handler of a service.
pub trait ServiceHost: Send + Sync {
    /// Route control codes for `service_name` into `controls`.
    fn register(
        &self,
        service_name: &ServiceName,
        controls: ControlSender,
    ) -> ServiceResult<Arc<dyn StatusReporter>>;
}

// ============================================================================
// In-process host
// ============================================================================

#[derive(Default)]
struct InProcessState {
    registered: Mutex<Option<ServiceName>>,
    controls: Mutex<Option<ControlSender>>,
    reports: Mutex<Vec<ServiceStatusReport>>,
    registration_error: Mutex<Option<ServiceError>>,
    report_attempts: Mutex<usize>,
    failing_report: Mutex<Option<usize>>,
}

/// Host living entirely in the current process.
///
/// Control codes are injected with [`send`](Self::send) and every report is
/// recorded. Registration and reporting can be made to fail.
#[derive(Clone, Default)]
pub struct InProcessServiceHost {
    state: Arc<InProcessState>,
}

impl InProcessServiceHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next registration with `error`.
    pub fn reject_registration(&self, error: ServiceError) {
        *self.state.registration_error.lock() = Some(error);
    }

    /// Fail the status update with the given 0-based index (counting failed ones).
    pub fn fail_report_at(&self, index: usize) {
        *self.state.failing_report.lock() = Some(index);
    }

    /// Deliver a control code. Returns false when no controller listens.
    pub fn send(&self, code: ControlCode) -> bool {
        match self.state.controls.lock().as_ref() {
            Some(controls) => controls.send(code).is_ok(),
            None => false,
        }
    }

    /// Drop the control sender, as a service manager going away would.
    pub fn close_controls(&self) {
        self.state.controls.lock().take();
    }

    pub fn registered_name(&self) -> Option<ServiceName> {
        self.state.registered.lock().clone()
    }

    pub fn reports(&self) -> Vec<ServiceStatusReport> {
        self.state.reports.lock().clone()
    }

    /// Reported states, in order.
    pub fn states(&self) -> Vec<ServiceState> {
        self.state.reports.lock().iter().map(|r| r.state).collect()
    }

    pub fn last_report(&self) -> Option<ServiceStatusReport> {
        self.state.reports.lock().last().copied()
    }
}

impl ServiceHost for InProcessServiceHost {
    fn register(
        &self,
        service_name: &ServiceName,
        controls: ControlSender,
    ) -> ServiceResult<Arc<dyn StatusReporter>> {
        if let Some(error) = self.state.registration_error.lock().take() {
            return Err(error);
        }
        *self.state.registered.lock() = Some(service_name.clone());
        *self.state.controls.lock() = Some(controls);
        Ok(Arc::new(InProcessReporter {
            state: Arc::clone(&self.state),
        }))
    }
}

struct InProcessReporter {
    state: Arc<InProcessState>,
}

impl StatusReporter for InProcessReporter {
    fn report(&self, report: &ServiceStatusReport) -> ServiceResult<()> {
        let attempt = {
            let mut attempts = self.state.report_attempts.lock();
            *attempts += 1;
            *attempts - 1
        };
        if *self.state.failing_report.lock() == Some(attempt) {
            return Err(ServiceError::registration_failed(
                "set service status",
                "status handle rejected the update",
            ));
        }
        self.state.reports.lock().push(*report);
        Ok(())
    }
}

// ============================================================================
// Console host
// ============================================================================

/// Host for running the service in a terminal.
///
/// Ctrl+C (and SIGTERM on Unix) deliver STOP; status updates go to the log.
/// Must be registered from within a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleServiceHost;

impl ServiceHost for ConsoleServiceHost {
    fn register(
        &self,
        service_name: &ServiceName,
        controls: ControlSender,
    ) -> ServiceResult<Arc<dyn StatusReporter>> {
        tokio::spawn(async move {
            // Every signal is a new STOP: a stop that could not be confirmed can be retried
            while shutdown_signal().await {
                if controls.send(ControlCode::Stop).is_err() {
                    break;
                }
            }
        });

        Ok(Arc::new(LogReporter {
            service_name: service_name.clone(),
        }))
    }
}

struct LogReporter {
    service_name: ServiceName,
}

impl StatusReporter for LogReporter {
    fn report(&self, report: &ServiceStatusReport) -> ServiceResult<()> {
        if report.state.is_pending() {
            debug!(
                "Service {} is {} (checkpoint {}, wait hint {:?})",
                self.service_name, report.state, report.checkpoint, report.wait_hint
            );
        } else {
            info!("Service {} is {}", self.service_name, report.state);
        }
        Ok(())
    }
}

/// Wait for a shutdown signal. Returns false when signals cannot be received.
async fn shutdown_signal() -> bool {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM signal"),
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C signal"),
                }
                return true;
            }
            Err(e) => warn!("Cannot listen for SIGTERM: {}", e),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C signal");
            true
        }
        Err(e) => {
            error!("Cannot listen for Ctrl+C: {}", e);
            false
        }
    }
}

// ============================================================================
// Windows SCM host
// ============================================================================

#[cfg(windows)]
pub use scm::ScmServiceHost;

#[cfg(windows)]
mod scm {
    use super::{ControlSender, ServiceHost, StatusReporter};
    use dsvc_common::{ServiceError, ServiceName, ServiceResult};
    use dsvc_service_state::{ControlCode, ServiceExitCode, ServiceState, ServiceStatusReport};
    use std::sync::Arc;
    use windows_service::service::{
        ServiceControl, ServiceControlAccept, ServiceExitCode as ScmExitCode,
        ServiceState as ScmState, ServiceStatus, ServiceType,
    };
    use windows_service::service_control_handler::{
        self, ServiceControlHandlerResult, ServiceStatusHandle,
    };

    /// Host backed by the Service Control Manager.
    ///
    /// Only usable from the service main function started by the dispatcher.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ScmServiceHost;

    impl ServiceHost for ScmServiceHost {
        fn register(
            &self,
            service_name: &ServiceName,
            controls: ControlSender,
        ) -> ServiceResult<Arc<dyn StatusReporter>> {
            let handler = move |control: ServiceControl| -> ServiceControlHandlerResult {
                let code = match control {
                    ServiceControl::Stop => ControlCode::Stop,
                    ServiceControl::Shutdown => ControlCode::Shutdown,
                    ServiceControl::Interrogate => ControlCode::Interrogate,
                    ServiceControl::Pause => ControlCode::Pause,
                    ServiceControl::Continue => ControlCode::Continue,
                    _ => return ServiceControlHandlerResult::NotImplemented,
                };
                match controls.send(code) {
                    Ok(()) => ServiceControlHandlerResult::NoError,
                    Err(_) => ServiceControlHandlerResult::NotImplemented,
                }
            };

            let handle = service_control_handler::register(service_name.as_str(), handler)
                .map_err(|e| {
                    ServiceError::registration_failed("register control handler", e.to_string())
                })?;
            Ok(Arc::new(ScmStatusReporter { handle }))
        }
    }

    struct ScmStatusReporter {
        handle: ServiceStatusHandle,
    }

    impl StatusReporter for ScmStatusReporter {
        fn report(&self, report: &ServiceStatusReport) -> ServiceResult<()> {
            self.handle
                .set_service_status(to_scm_status(report))
                .map_err(|e| ServiceError::registration_failed("set service status", e.to_string()))
        }
    }

    fn to_scm_status(report: &ServiceStatusReport) -> ServiceStatus {
        let mut controls_accepted = ServiceControlAccept::empty();
        if report.controls_accepted.stop {
            controls_accepted |= ServiceControlAccept::STOP;
        }
        if report.controls_accepted.shutdown {
            controls_accepted |= ServiceControlAccept::SHUTDOWN;
        }

        ServiceStatus {
            service_type: ServiceType::OWN_PROCESS,
            current_state: match report.state {
                ServiceState::Stopped => ScmState::Stopped,
                ServiceState::StartPending => ScmState::StartPending,
                ServiceState::StopPending => ScmState::StopPending,
                ServiceState::Running => ScmState::Running,
                ServiceState::ContinuePending => ScmState::ContinuePending,
                ServiceState::PausePending => ScmState::PausePending,
                ServiceState::Paused => ScmState::Paused,
            },
            controls_accepted,
            exit_code: match report.exit_code {
                ServiceExitCode::None => ScmExitCode::Win32(0),
                ServiceExitCode::Win32(code) => ScmExitCode::Win32(code),
                ServiceExitCode::ServiceSpecific(code) => ScmExitCode::ServiceSpecific(code),
            },
            checkpoint: report.checkpoint,
            wait_hint: report.wait_hint,
            process_id: None,
        }
    }
}
