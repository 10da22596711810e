//! Named lifecycle events.

use parking_lot::Mutex;
use std::fmt;
use tracing::{error, info};

/// Target of the structured events written by [`TracingEventSink`].
pub const EVENT_TARGET: &str = "dsvc::events";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    ServerStarted,
    StartFailed { reason: String },
    ServerStopped,
    StopFailed { reason: String },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::ServerStarted => "server-started",
            LifecycleEvent::StartFailed { .. } => "server-start-failed",
            LifecycleEvent::ServerStopped => "server-stopped",
            LifecycleEvent::StopFailed { .. } => "server-stop-failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::StartFailed { .. } | LifecycleEvent::StopFailed { .. }
        )
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            LifecycleEvent::StartFailed { reason } | LifecycleEvent::StopFailed { reason } => {
                Some(reason)
            }
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{}: {}", self.name(), reason),
            None => write!(f, "{}", self.name()),
        }
    }
}

/// Receiver of lifecycle events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LifecycleEvent);
}

/// Writes events as structured `tracing` records.
#[derive(Debug, Clone)]
pub struct TracingEventSink {
    instance: String,
}

impl TracingEventSink {
    pub fn new(instance: impl fmt::Display) -> Self {
        Self {
            instance: instance.to_string(),
        }
    }
}

impl EventSink for TracingEventSink {
    fn emit(&self, event: LifecycleEvent) {
        let reason = event.reason().unwrap_or_default();
        if event.is_failure() {
            error!(target: EVENT_TARGET, event = event.name(), instance = %self.instance, reason, "Lifecycle event");
        } else {
            info!(target: EVENT_TARGET, event = event.name(), instance = %self.instance, "Lifecycle event");
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(LifecycleEvent::name).collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: LifecycleEvent) {
        self.events.lock().push(event);
    }
}
