//! # dsvc Service Management
//!
//! Configuration and subcommands of the directory server service helper.
//!
//! This crate provides:
//! - YAML configuration with defaults and validation
//! - [`ServiceHelper`]: create, state, remove, cleanup, start, isrunning,
//!   launch and stop, each resolved to an outcome with an exit code
//! - The choice of service database for the platform

pub mod backend;
pub mod commands;
pub mod config;

// Re-export main types
pub use backend::service_manager;
pub use commands::{
    CommandOutcome, CreateOutcome, RemoveOutcome, RunningOutcome, ServiceHelper, StartOutcome,
    StateOutcome,
};
pub use config::{ServiceHelperConfig, DEFAULT_CONFIG_FILE};
