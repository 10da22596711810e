//! # dsvc-service-state
//!
//! The states a service reports to the OS service manager, the control
//! codes it receives, and a validated state machine that tracks the
//! lifecycle of one service-host run:
//!
//! ```text
//! STOPPED -> START_PENDING -> RUNNING -> STOP_PENDING -> STOPPED
//!                 |
//!                 +--> STOPPED (start failed)
//! ```
//!
//! An unconfirmed stop stays in STOP_PENDING; a later STOP or SHUTDOWN
//! retries from there.
//!
//! The machine also owns the checkpoint counter: entering a pending state
//! restarts it at [`CHECKPOINT_FIRST_VALUE`] and every report issued while
//! pending increments it. Settled states report [`CHECKPOINT_NONE`].

use chrono::{DateTime, Utc};
use dsvc_common::{ServiceError, ServiceResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Checkpoint reported with the first update of a pending transition.
pub const CHECKPOINT_FIRST_VALUE: u32 = 1;

/// Checkpoint reported when no operation is ongoing.
pub const CHECKPOINT_NONE: u32 = 0;

const MAX_HISTORY: usize = 100;

/// Service state as understood by the OS service manager.
///
/// The pause states are never entered by this service; they mirror the
/// SCM state set so the state of any registered service can be read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceState {
    Stopped,
    StartPending,
    StopPending,
    Running,
    ContinuePending,
    PausePending,
    Paused,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Stopped => write!(f, "STOPPED"),
            ServiceState::StartPending => write!(f, "START_PENDING"),
            ServiceState::StopPending => write!(f, "STOP_PENDING"),
            ServiceState::Running => write!(f, "RUNNING"),
            ServiceState::ContinuePending => write!(f, "CONTINUE_PENDING"),
            ServiceState::PausePending => write!(f, "PAUSE_PENDING"),
            ServiceState::Paused => write!(f, "PAUSED"),
        }
    }
}

impl ServiceState {
    /// Whether the service manager expects checkpoint updates in this state.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            ServiceState::StartPending
                | ServiceState::StopPending
                | ServiceState::ContinuePending
                | ServiceState::PausePending
        )
    }

    /// Controls announced as accepted while in this state.
    ///
    /// Nothing is accepted while starting up. INTERROGATE is always handled
    /// and is not part of the announcement.
    pub fn accepted_controls(&self) -> AcceptedControls {
        match self {
            ServiceState::StartPending => AcceptedControls::NONE,
            _ => AcceptedControls::STOP_AND_SHUTDOWN,
        }
    }
}

/// Control requests delivered by the service manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCode {
    Stop,
    Shutdown,
    Interrogate,
    Pause,
    Continue,
    /// Any other code; ignored.
    Other(u32),
}

impl fmt::Display for ControlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCode::Stop => write!(f, "stop"),
            ControlCode::Shutdown => write!(f, "shutdown"),
            ControlCode::Interrogate => write!(f, "interrogate"),
            ControlCode::Pause => write!(f, "pause"),
            ControlCode::Continue => write!(f, "continue"),
            ControlCode::Other(code) => write!(f, "control {}", code),
        }
    }
}

/// The set of controls a service announces as accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcceptedControls {
    pub stop: bool,
    pub shutdown: bool,
}

impl AcceptedControls {
    pub const NONE: Self = Self {
        stop: false,
        shutdown: false,
    };

    pub const STOP_AND_SHUTDOWN: Self = Self {
        stop: true,
        shutdown: true,
    };

    pub fn is_empty(&self) -> bool {
        !self.stop && !self.shutdown
    }
}

/// Exit code carried by a status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceExitCode {
    /// `NO_ERROR`.
    #[default]
    None,
    /// Win32 error code.
    Win32(u32),
    /// Service-specific code (reported with `ERROR_SERVICE_SPECIFIC_ERROR`).
    ServiceSpecific(u32),
}

/// One status update sent to the service manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStatusReport {
    pub state: ServiceState,
    pub controls_accepted: AcceptedControls,
    pub exit_code: ServiceExitCode,
    pub checkpoint: u32,
    pub wait_hint: Duration,
}

impl ServiceStatusReport {
    /// A settled report: checkpoint and wait hint are zero.
    pub fn settled(state: ServiceState) -> Self {
        Self {
            state,
            controls_accepted: state.accepted_controls(),
            exit_code: ServiceExitCode::None,
            checkpoint: CHECKPOINT_NONE,
            wait_hint: Duration::ZERO,
        }
    }

    pub fn with_exit_code(mut self, exit_code: ServiceExitCode) -> Self {
        self.exit_code = exit_code;
        self
    }
}

/// A state transition with timestamp and optional reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_state: ServiceState,
    pub to_state: ServiceState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Lifecycle state machine of one service-host run.
#[derive(Debug, Clone)]
pub struct ServiceStateMachine {
    service_name: String,
    current_state: ServiceState,
    previous_state: Option<ServiceState>,
    checkpoint: u32,
    state_history: Vec<StateTransition>,
    last_transition_time: DateTime<Utc>,
}

impl ServiceStateMachine {
    /// Create a machine for a service that has not started yet.
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            current_state: ServiceState::Stopped,
            previous_state: None,
            checkpoint: CHECKPOINT_NONE,
            state_history: Vec::new(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn current_state(&self) -> ServiceState {
        self.current_state
    }

    pub fn previous_state(&self) -> Option<ServiceState> {
        self.previous_state
    }

    pub fn state_history(&self) -> &[StateTransition] {
        &self.state_history
    }

    pub fn last_transition_time(&self) -> DateTime<Utc> {
        self.last_transition_time
    }

    /// Check if a transition from the current state to `target` is valid.
    pub fn is_valid_transition(&self, target: ServiceState) -> bool {
        match (self.current_state, target) {
            // Startup
            (ServiceState::Stopped, ServiceState::StartPending) => true,
            (ServiceState::StartPending, ServiceState::Running) => true,
            (ServiceState::StartPending, ServiceState::Stopped) => true,

            // Stop
            (ServiceState::Running, ServiceState::StopPending) => true,
            (ServiceState::StopPending, ServiceState::Stopped) => true,

            // A second stop while stopping is a checkpoint refresh
            (state, target) if state == target => true,

            _ => false,
        }
    }

    /// Transition to `target` with an optional reason.
    ///
    /// Entering a pending state restarts the checkpoint counter; staying in
    /// the same pending state keeps counting.
    pub fn transition_to(&mut self, target: ServiceState, reason: Option<String>) -> ServiceResult<()> {
        if !self.is_valid_transition(target) {
            return Err(ServiceError::invalid_transition(
                &self.service_name,
                self.current_state.to_string(),
                target.to_string(),
            ));
        }

        let from = self.current_state;
        if from == target {
            return Ok(());
        }

        let now = Utc::now();
        self.state_history.push(StateTransition {
            from_state: from,
            to_state: target,
            timestamp: now,
            reason,
        });
        if self.state_history.len() > MAX_HISTORY {
            self.state_history.remove(0);
        }

        self.previous_state = Some(from);
        self.current_state = target;
        self.last_transition_time = now;
        self.checkpoint = if target.is_pending() {
            CHECKPOINT_FIRST_VALUE
        } else {
            CHECKPOINT_NONE
        };

        tracing::debug!("Service {} transitioned from {} to {}", self.service_name, from, target);
        Ok(())
    }

    pub fn transition_to_start_pending(&mut self) -> ServiceResult<()> {
        self.transition_to(ServiceState::StartPending, Some("Service start requested".to_string()))
    }

    pub fn transition_to_running(&mut self) -> ServiceResult<()> {
        self.transition_to(ServiceState::Running, Some("Server confirmed running".to_string()))
    }

    pub fn transition_to_stop_pending(&mut self) -> ServiceResult<()> {
        self.transition_to(ServiceState::StopPending, Some("Service stop requested".to_string()))
    }

    pub fn transition_to_stopped(&mut self, reason: impl Into<String>) -> ServiceResult<()> {
        self.transition_to(ServiceState::Stopped, Some(reason.into()))
    }

    /// Build the next status report for the current state.
    ///
    /// While pending, the report carries the current checkpoint and the
    /// counter advances; otherwise checkpoint and wait hint are zero.
    pub fn next_report(&mut self, wait_hint: Duration) -> ServiceStatusReport {
        if !self.current_state.is_pending() {
            return ServiceStatusReport::settled(self.current_state);
        }

        let checkpoint = self.checkpoint;
        self.checkpoint = self.checkpoint.saturating_add(1);
        ServiceStatusReport {
            state: self.current_state,
            controls_accepted: self.current_state.accepted_controls(),
            exit_code: ServiceExitCode::None,
            checkpoint,
            wait_hint,
        }
    }

    /// Count transitions to a specific state.
    pub fn count_transitions_to(&self, state: ServiceState) -> usize {
        self.state_history.iter().filter(|t| t.to_state == state).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HINT: Duration = Duration::from_secs(10);

    #[test]
    fn test_state_machine_creation() {
        let sm = ServiceStateMachine::new("OpenDS");
        assert_eq!(sm.current_state(), ServiceState::Stopped);
        assert_eq!(sm.previous_state(), None);
        assert!(sm.state_history().is_empty());
    }

    #[test]
    fn test_full_lifecycle() {
        let mut sm = ServiceStateMachine::new("OpenDS");

        sm.transition_to_start_pending().unwrap();
        sm.transition_to_running().unwrap();
        sm.transition_to_stop_pending().unwrap();
        sm.transition_to_stopped("Server stopped").unwrap();

        assert_eq!(sm.state_history().len(), 4);
        assert_eq!(sm.state_history()[0].from_state, ServiceState::Stopped);
        assert_eq!(sm.state_history()[0].to_state, ServiceState::StartPending);
        assert_eq!(sm.state_history()[3].to_state, ServiceState::Stopped);
        assert_eq!(sm.previous_state(), Some(ServiceState::StopPending));
    }

    #[test]
    fn test_invalid_transitions() {
        let mut sm = ServiceStateMachine::new("OpenDS");

        // Must go through START_PENDING
        assert!(!sm.is_valid_transition(ServiceState::Running));
        assert!(matches!(
            sm.transition_to(ServiceState::Running, None),
            Err(ServiceError::InvalidTransition { .. })
        ));

        sm.transition_to_start_pending().unwrap();
        assert!(sm.transition_to_stop_pending().is_err());
        assert!(sm.transition_to(ServiceState::Paused, None).is_err());
    }

    #[test]
    fn test_start_failure_and_unconfirmed_stop() {
        let mut sm = ServiceStateMachine::new("OpenDS");
        sm.transition_to_start_pending().unwrap();
        sm.transition_to_stopped("Server did not come up").unwrap();
        assert_eq!(sm.count_transitions_to(ServiceState::Stopped), 1);

        // An unconfirmed stop stays in STOP_PENDING; a second stop keeps counting
        let mut sm = ServiceStateMachine::new("OpenDS");
        sm.transition_to_start_pending().unwrap();
        sm.transition_to_running().unwrap();
        sm.transition_to_stop_pending().unwrap();
        assert!(sm.transition_to_running().is_err());
        assert_eq!(sm.next_report(HINT).checkpoint, 1);
        sm.transition_to_stop_pending().unwrap();
        assert_eq!(sm.next_report(HINT).checkpoint, 2);
        assert_eq!(sm.current_state(), ServiceState::StopPending);
    }

    #[test]
    fn test_pause_states_are_never_entered() {
        let mut sm = ServiceStateMachine::new("OpenDS");
        sm.transition_to_start_pending().unwrap();
        sm.transition_to_running().unwrap();

        for state in [ServiceState::PausePending, ServiceState::Paused, ServiceState::ContinuePending] {
            assert!(!sm.is_valid_transition(state), "{} must be rejected", state);
        }
        assert_eq!(sm.current_state(), ServiceState::Running);
        // Still reportable when read back from the service manager
        assert_eq!(ServiceState::Paused.accepted_controls(), AcceptedControls::STOP_AND_SHUTDOWN);
    }

    #[test]
    fn test_checkpoints_increase_while_pending() {
        let mut sm = ServiceStateMachine::new("OpenDS");
        sm.transition_to_start_pending().unwrap();

        let checkpoints: Vec<u32> = (0..3).map(|_| sm.next_report(HINT).checkpoint).collect();
        assert_eq!(checkpoints, vec![1, 2, 3]);

        // Same-state transition keeps counting
        sm.transition_to_start_pending().unwrap();
        assert_eq!(sm.next_report(HINT).checkpoint, 4);

        sm.transition_to_running().unwrap();
        let report = sm.next_report(HINT);
        assert_eq!(report.checkpoint, CHECKPOINT_NONE);
        assert_eq!(report.wait_hint, Duration::ZERO);

        // A new pending state restarts the counter
        sm.transition_to_stop_pending().unwrap();
        assert_eq!(sm.next_report(HINT).checkpoint, CHECKPOINT_FIRST_VALUE);
    }

    #[test]
    fn test_accepted_controls() {
        let mut sm = ServiceStateMachine::new("OpenDS");
        sm.transition_to_start_pending().unwrap();
        assert!(sm.next_report(HINT).controls_accepted.is_empty());

        sm.transition_to_running().unwrap();
        assert_eq!(sm.next_report(HINT).controls_accepted, AcceptedControls::STOP_AND_SHUTDOWN);

        assert_eq!(
            ServiceState::Stopped.accepted_controls(),
            AcceptedControls::STOP_AND_SHUTDOWN
        );
    }

    #[test]
    fn test_state_properties() {
        assert!(ServiceState::StartPending.is_pending());
        assert!(ServiceState::StopPending.is_pending());
        assert!(!ServiceState::Running.is_pending());
        assert!(!ServiceState::Stopped.is_pending());
        assert_eq!(ServiceState::StopPending.to_string(), "STOP_PENDING");
    }
}
