//! # dsvc Service Lifecycle
//!
//! The state machine a running service-host process drives.
//!
//! This crate provides:
//! - [`ServiceLifecycleController`] - start protocol, serial control dispatch, stop protocol
//! - [`ServiceContext`] - per-run state shared by startup and control handlers
//! - Service hosts: in-process (tests), console (Ctrl+C / SIGTERM) and the Windows SCM
//! - [`ServerLauncher`] seam over the server's start and stop commands
//! - Named lifecycle events

pub mod context;
pub mod controller;
pub mod events;
pub mod host;
pub mod launcher;


// Re-export main types
pub use context::ServiceContext;
pub use controller::{LifecycleSettings, ServiceLifecycleController, ServiceOutcome, WaitHints};
pub use events::{EventSink, LifecycleEvent, RecordingEventSink, TracingEventSink, EVENT_TARGET};
pub use host::{
    ConsoleServiceHost, ControlReceiver, ControlSender, InProcessServiceHost, ServiceHost,
    StatusReporter,
};
#[cfg(windows)]
pub use host::ScmServiceHost;
pub use launcher::{ScriptLauncher, ServerLauncher};
