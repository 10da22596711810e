//! # dsvc-process
//!
//! Supervision of the directory server process.
//!
//! This crate provides:
//! - Command-line construction with minimal quoting
//! - Process spawning (foreground or detached)
//! - Process exit checks and forced termination
//! - [`ProcessSupervisor`], which ties spawning, PID file bookkeeping and
//!   bounded termination polling together

pub mod check;
pub mod command_line;
pub mod execute;
pub mod supervisor;
pub mod terminate;

// Re-export main types
pub use check::has_exited;
pub use command_line::{build_command_line, DEFAULT_MAX_COMMAND_LINE};
pub use execute::{spawn_process, ProcessHandle};
pub use supervisor::{LaunchOutcome, ProcessSupervisor, StopOutcome, SupervisorSettings};
pub use terminate::{force_kill, OsProcessSignaller, ProcessSignaller};
