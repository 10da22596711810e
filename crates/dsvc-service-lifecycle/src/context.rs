//! ServiceContext - everything one service-host run shares between its
//! startup sequence and its control handlers.

use crate::host::StatusReporter;
use dsvc_common::{ServerInstance, ServiceName, ServiceResult};
use dsvc_service_state::{
    ServiceExitCode, ServiceState, ServiceStateMachine, ServiceStatusReport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Per-run state owned by the controller.
///
/// The termination token is set once, when the server is confirmed
/// stopped, and wakes the run waiting on it.
pub struct ServiceContext {
    service_name: ServiceName,
    instance: ServerInstance,
    machine: ServiceStateMachine,
    reporter: Arc<dyn StatusReporter>,
    termination: CancellationToken,
    last_report: Option<ServiceStatusReport>,
}

impl ServiceContext {
    pub fn new(
        service_name: ServiceName,
        instance: ServerInstance,
        reporter: Arc<dyn StatusReporter>,
        termination: CancellationToken,
    ) -> Self {
        let machine = ServiceStateMachine::new(service_name.as_str());
        Self {
            service_name,
            instance,
            machine,
            reporter,
            termination,
            last_report: None,
        }
    }

    pub fn service_name(&self) -> &ServiceName {
        &self.service_name
    }

    pub fn instance(&self) -> &ServerInstance {
        &self.instance
    }

    pub fn current_state(&self) -> ServiceState {
        self.machine.current_state()
    }

    pub fn machine(&self) -> &ServiceStateMachine {
        &self.machine
    }

    pub fn last_report(&self) -> Option<&ServiceStatusReport> {
        self.last_report.as_ref()
    }

    /// Move the state machine to `state`.
    pub fn enter(&mut self, state: ServiceState, reason: impl Into<String>) -> ServiceResult<()> {
        self.machine.transition_to(state, Some(reason.into()))
    }

    /// Report the current pending state with the next checkpoint.
    pub fn report_progress(&mut self, wait_hint: Duration) -> ServiceResult<()> {
        let report = self.machine.next_report(wait_hint);
        self.send(report)
    }

    /// Report the current state as settled.
    pub fn report_current(&mut self) -> ServiceResult<()> {
        self.send(ServiceStatusReport::settled(self.machine.current_state()))
    }

    /// Report `state` without touching the state machine.
    pub fn report_observed(&mut self, state: ServiceState) -> ServiceResult<()> {
        self.send(ServiceStatusReport::settled(state))
    }

    /// Report STOPPED carrying `exit_code`.
    pub fn report_stopped_with(&mut self, exit_code: ServiceExitCode) -> ServiceResult<()> {
        self.send(ServiceStatusReport::settled(ServiceState::Stopped).with_exit_code(exit_code))
    }

    fn send(&mut self, report: ServiceStatusReport) -> ServiceResult<()> {
        debug!(
            "Reporting {} for {} (checkpoint {}, wait hint {:?})",
            report.state, self.service_name, report.checkpoint, report.wait_hint
        );
        self.reporter.report(&report).map_err(|e| {
            warn!("Status update for {} failed: {}", self.service_name, e);
            e
        })?;
        self.last_report = Some(report);
        Ok(())
    }

    /// Wake the waiting run. Idempotent.
    pub fn terminate(&self) {
        self.termination.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.termination.is_cancelled()
    }

    pub fn termination(&self) -> &CancellationToken {
        &self.termination
    }
}
