//! ServiceLifecycleController - drives one run of the service host.
//!
//! ## Startup
//!
//! 1. Register the control handler with the host
//! 2. Report START_PENDING (checkpoint 1, then 2) while announcing the start
//! 3. Run the start command
//! 4. Poll the liveness probe, reporting a new checkpoint before every check
//! 5. Report RUNNING once the server holds its lock, or STOPPED with a
//!    service-specific exit code when it never does
//!
//! A successful spawn alone never counts as a start.
//!
//! ## Control dispatch
//!
//! Control codes arrive on a channel and are handled one at a time by the
//! run loop, so a second STOP queues behind the first. The loop ends when
//! the termination token is cancelled, which happens once a stop has been
//! confirmed by the probe.
//!
//! ## Wait hints
//!
//! Every pending report advertises a wait hint. Poll delays are checked
//! against those hints by configuration validation, so no gap between two
//! checkpoints exceeds what was advertised.

use crate::context::ServiceContext;
use crate::events::{EventSink, LifecycleEvent, TracingEventSink};
use crate::host::{ControlReceiver, ServiceHost};
use crate::launcher::ServerLauncher;
use dsvc_common::{
    poll_until, Clock, PollOutcome, PollPolicy, ProcessError, ServerInstance, ServiceError,
    ServiceName, ServiceResult, TokioClock,
};
use dsvc_process_file::{Liveness, LivenessCheck};
use dsvc_service_state::{ControlCode, ServiceExitCode, ServiceState};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Wait hints advertised with pending reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitHints {
    /// First START_PENDING report, before the start is set up.
    pub create_event: Duration,
    /// START_PENDING while the server is launched and confirmed.
    pub start: Duration,
    /// STOP_PENDING while the server is stopped and confirmed.
    pub stop: Duration,
}

impl Default for WaitHints {
    fn default() -> Self {
        Self {
            create_event: Duration::from_secs(5),
            start: Duration::from_secs(10),
            stop: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub start_poll: PollPolicy,
    pub stop_poll: PollPolicy,
    pub wait_hints: WaitHints,
    /// Service-specific exit code reported when the server does not start.
    pub start_failure_exit_code: u32,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        let confirm = PollPolicy::new(Duration::from_secs(3), Duration::from_secs(2), 10);
        Self {
            start_poll: confirm,
            stop_poll: confirm,
            wait_hints: WaitHints::default(),
            start_failure_exit_code: 1,
        }
    }
}

/// How a run of the controller ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceOutcome {
    /// The server ran and was stopped (or the run was terminated).
    Stopped,
    /// The server did not come up; STOPPED was reported.
    StartFailed { reason: String },
    /// No control handler could be registered; nothing was reported.
    RegistrationFailed { reason: String },
}

enum StartAbort {
    Report(ServiceError),
    Probe(ProcessError),
}

impl fmt::Display for StartAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartAbort::Report(e) => write!(f, "status update failed: {}", e),
            StartAbort::Probe(e) => write!(f, "liveness probe failed: {}", e),
        }
    }
}

/// State machine driven by one service-host run.
pub struct ServiceLifecycleController {
    service_name: ServiceName,
    instance: ServerInstance,
    settings: LifecycleSettings,
    host: Arc<dyn ServiceHost>,
    launcher: Arc<dyn ServerLauncher>,
    probe: Arc<dyn LivenessCheck>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    termination: CancellationToken,
}

impl ServiceLifecycleController {
    pub fn new(
        service_name: ServiceName,
        instance: ServerInstance,
        settings: LifecycleSettings,
        host: Arc<dyn ServiceHost>,
        launcher: Arc<dyn ServerLauncher>,
        probe: Arc<dyn LivenessCheck>,
    ) -> Self {
        let events = Arc::new(TracingEventSink::new(&instance));
        Self {
            service_name,
            instance,
            settings,
            host,
            launcher,
            probe,
            events,
            clock: Arc::new(TokioClock),
            termination: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Token that ends the run when cancelled.
    pub fn termination(&self) -> CancellationToken {
        self.termination.clone()
    }

    /// Run the service: start, serve controls until terminated, report STOPPED.
    ///
    /// Never fails; every error ends up in the returned outcome and the log.
    pub async fn run(self) -> ServiceOutcome {
        info!("Running service {} for {}", self.service_name, self.instance);

        let (controls_tx, controls_rx) = mpsc::unbounded_channel();
        let reporter = match self.host.register(&self.service_name, controls_tx) {
            Ok(reporter) => reporter,
            Err(e) => {
                let reason = format!("could not register control handler: {}", e);
                error!("Service {}: {}", self.service_name, reason);
                self.events.emit(LifecycleEvent::StartFailed {
                    reason: reason.clone(),
                });
                return ServiceOutcome::RegistrationFailed { reason };
            }
        };

        let mut ctx = ServiceContext::new(
            self.service_name.clone(),
            self.instance.clone(),
            reporter,
            self.termination.clone(),
        );

        if let Err(reason) = self.start(&mut ctx).await {
            return ServiceOutcome::StartFailed { reason };
        }

        self.serve(&mut ctx, controls_rx).await;

        if ctx.current_state() != ServiceState::Stopped {
            debug!("Service {} terminated while {}", self.service_name, ctx.current_state());
            if ctx.current_state() == ServiceState::Running {
                let _ = ctx.enter(ServiceState::StopPending, "Service host terminating");
            }
            let _ = ctx.enter(ServiceState::Stopped, "Service host terminated");
            let _ = ctx.report_current();
        }

        info!("Service {} finished", self.service_name);
        ServiceOutcome::Stopped
    }

    fn announce_start(&self, ctx: &mut ServiceContext) -> ServiceResult<()> {
        let hints = self.settings.wait_hints;
        ctx.enter(ServiceState::StartPending, "Service start requested")?;
        ctx.report_progress(hints.create_event)?;
        ctx.report_progress(hints.start)
    }

    async fn start(&self, ctx: &mut ServiceContext) -> Result<(), String> {
        if let Err(e) = self.announce_start(ctx) {
            return Err(self.fail_start(ctx, format!("could not announce start: {}", e)));
        }

        if let Err(e) = self.launcher.start_server().await {
            return Err(self.fail_start(ctx, format!("start command failed: {}", e)));
        }

        let hint = self.settings.wait_hints.start;
        let probe = Arc::clone(&self.probe);
        let confirmed: Result<PollOutcome<()>, StartAbort> =
            poll_until(&self.settings.start_poll, self.clock.as_ref(), |attempt| {
                ctx.report_progress(hint).map_err(StartAbort::Report)?;
                match probe.check().map_err(StartAbort::Probe)? {
                    Liveness::Running => Ok(Some(())),
                    Liveness::NotRunning => {
                        debug!("Start check {}: server not running yet", attempt);
                        Ok(None)
                    }
                }
            })
            .await;

        match confirmed {
            Ok(PollOutcome::Ready { attempts, .. }) => {
                debug!("Server confirmed running after {} checks", attempts);
            }
            Ok(PollOutcome::Exhausted { attempts }) => {
                return Err(self.fail_start(
                    ctx,
                    format!("server not running after {} checks", attempts),
                ));
            }
            Err(abort) => return Err(self.fail_start(ctx, abort.to_string())),
        }

        if let Err(e) = ctx.enter(ServiceState::Running, "Server confirmed running") {
            return Err(self.fail_start(ctx, e.to_string()));
        }
        // The server is up either way; a lost RUNNING update is only logged
        let _ = ctx.report_current();
        info!("Service {} is running", self.service_name);
        self.events.emit(LifecycleEvent::ServerStarted);
        Ok(())
    }

    fn fail_start(&self, ctx: &mut ServiceContext, reason: String) -> String {
        error!("Service {} failed to start: {}", self.service_name, reason);
        if let Err(e) = ctx.enter(ServiceState::Stopped, reason.as_str()) {
            warn!("{}", e);
        }
        let exit_code = ServiceExitCode::ServiceSpecific(self.settings.start_failure_exit_code);
        let _ = ctx.report_stopped_with(exit_code);
        self.events.emit(LifecycleEvent::StartFailed {
            reason: reason.clone(),
        });
        reason
    }

    async fn serve(&self, ctx: &mut ServiceContext, mut controls: ControlReceiver) {
        let termination = ctx.termination().clone();
        loop {
            tokio::select! {
                biased;

                _ = termination.cancelled() => {
                    debug!("Termination signalled for {}", self.service_name);
                    break;
                }

                maybe_code = controls.recv() => {
                    match maybe_code {
                        Some(code) => self.handle_control(ctx, code).await,
                        None => {
                            warn!("Control channel of {} closed; waiting for termination", self.service_name);
                            termination.cancelled().await;
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn handle_control(&self, ctx: &mut ServiceContext, code: ControlCode) {
        match code {
            ControlCode::Stop | ControlCode::Shutdown => self.stop(ctx, code).await,
            ControlCode::Interrogate => self.interrogate(ctx),
            ControlCode::Pause | ControlCode::Continue => {
                debug!("{} is not supported, ignoring", code);
            }
            ControlCode::Other(_) => debug!("Ignoring {}", code),
        }
    }

    /// Stop protocol. Best effort: a failing stop command still gets its
    /// outcome checked through the probe.
    async fn stop(&self, ctx: &mut ServiceContext, code: ControlCode) {
        info!("Received {} for {}", code, self.service_name);
        if let Err(e) = ctx.enter(ServiceState::StopPending, format!("{} requested", code)) {
            warn!("Cannot stop {}: {}", self.service_name, e);
            return;
        }

        let hint = self.settings.wait_hints.stop;
        let _ = ctx.report_progress(hint);

        if let Err(e) = self.launcher.stop_server().await {
            warn!("Stop command failed for {}: {}; checking anyway", self.service_name, e);
        }

        let probe = Arc::clone(&self.probe);
        let confirmed = poll_until(&self.settings.stop_poll, self.clock.as_ref(), |attempt| {
            let _ = ctx.report_progress(hint);
            probe.check().map(|liveness| {
                debug!("Stop check {}: {}", attempt, liveness);
                (liveness == Liveness::NotRunning).then_some(())
            })
        })
        .await;

        let failure = match confirmed {
            Ok(PollOutcome::Ready { .. }) => None,
            Ok(PollOutcome::Exhausted { attempts }) => {
                Some(format!("server still running after {} checks", attempts))
            }
            Err(e) => Some(format!("liveness probe failed: {}", e)),
        };

        match failure {
            None => {
                if let Err(e) = ctx.enter(ServiceState::Stopped, "Server confirmed stopped") {
                    warn!("{}", e);
                }
                let _ = ctx.report_current();
                ctx.terminate();
                info!("Service {} stopped", self.service_name);
                self.events.emit(LifecycleEvent::ServerStopped);
            }
            Some(reason) => {
                // STOP_PENDING stays the last report; a resent STOP retries
                error!("Service {} did not stop: {}", self.service_name, reason);
                self.events.emit(LifecycleEvent::StopFailed { reason });
            }
        }
    }

    /// Report what the probe sees, leaving the state machine alone.
    fn interrogate(&self, ctx: &mut ServiceContext) {
        let observed = match self.probe.check() {
            Ok(Liveness::Running) => ServiceState::Running,
            Ok(Liveness::NotRunning) => ServiceState::Stopped,
            Err(e) => {
                warn!("Interrogate could not probe {}: {}", self.instance, e);
                ctx.current_state()
            }
        };
        debug!("Interrogate: {} is {}", self.service_name, observed);
        let _ = ctx.report_observed(observed);
    }
}
