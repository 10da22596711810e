//! # dsvc-common
//!
//! Common types and utilities shared by the directory server service helper.
//!
//! This crate provides the foundations the other crates build upon:
//! - the error taxonomy (process, liveness and service-manager failures)
//! - the server instance layout (PID file and lock file locations)
//! - a bounded poll-with-backoff utility driven by an injectable clock

pub mod errors;
pub mod poll;
pub mod types;

// Re-export commonly used items
pub use errors::{Error, ProcessError, ProcessResult, Result, ResultExt, ServiceError, ServiceResult};
pub use poll::{poll_until, Clock, ManualClock, PollOutcome, PollPolicy, TokioClock};
pub use types::{ServerInstance, ServiceName};
