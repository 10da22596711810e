//! Error types for the service helper.
//!
//! Three families live here:
//! - [`Error`] for general failures (validation, I/O, wrapped context)
//! - [`ProcessError`] for supervision and liveness failures
//! - [`ServiceError`] for the OS service-manager capability
//!
//! Supervisory sequences collapse these into coarse outcomes before they
//! reach the service manager; registry callers match on the variants to
//! tell "already installed" apart from a real failure.

use thiserror::Error;

/// Result type alias for general operations.
pub type Result<T> = std::result::Result<T, Error>;

/// General error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid input or configuration.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// I/O error (wraps std::io::Error).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Process supervision error.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Service manager error.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Generic error with context.
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        source: Box<Error>,
    },
}

impl Error {
    /// Creates a Validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Adds context to an error.
    pub fn context(self, message: impl Into<String>) -> Self {
        Self::WithContext {
            message: message.into(),
            source: Box::new(self),
        }
    }
}

// Convenience methods for Result types
pub trait ResultExt<T> {
    /// Adds context to an error result.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(message))
    }
}

// ==============================================================================
// Process Supervision Errors
// ==============================================================================

/// Errors raised while spawning, probing or terminating the server process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("Process spawn failed: {command} - {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("Liveness probe failed: {path} - {reason}")]
    ProbeFailed { path: String, reason: String },

    #[error("PID file error: {path} - {reason}")]
    PidFile { path: String, reason: String },

    #[error("Process termination failed: pid {pid} - {reason}")]
    TerminateFailed { pid: u32, reason: String },

    #[error("Timed out waiting for {operation} after {attempts} attempts")]
    Timeout { operation: String, attempts: u32 },

    #[error("Process configuration error: {id} - {reason}")]
    Configuration { id: String, reason: String },
}

impl ProcessError {
    pub fn spawn_failed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            command: command.into(),
            reason: reason.into(),
        }
    }

    pub fn probe_failed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProbeFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn pid_file(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PidFile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn terminate_failed(pid: u32, reason: impl Into<String>) -> Self {
        Self::TerminateFailed {
            pid,
            reason: reason.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, attempts: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            attempts,
        }
    }

    pub fn configuration(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for process operations.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

// ==============================================================================
// Service Manager Errors
// ==============================================================================

/// Errors surfaced by the service registry and the OS service-manager capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The service manager rejected an operation.
    #[error("Service manager rejected {operation}: {reason}")]
    RegistrationFailed { operation: String, reason: String },

    /// Another registration already uses the requested service name.
    #[error("Service name already in use: {name}")]
    NameConflict { name: String },

    /// A registration already runs the same command.
    #[error("A service already runs this command: {name}")]
    AlreadyExists { name: String },

    /// Delete accepted, but the record lingers until every handle is closed.
    #[error("Service marked for deletion: {name}")]
    MarkedForDeletion { name: String },

    #[error("Service not found: {name}")]
    NotFound { name: String },

    /// The enumeration buffer was too small even after one growth.
    #[error("Service list buffer too small: {provided} bytes provided, {required} required")]
    BufferTooSmall { provided: usize, required: usize },

    /// The lifecycle state machine refused a transition.
    #[error("Invalid service state transition for {name}: {from} -> {to}")]
    InvalidTransition { name: String, from: String, to: String },

    /// Every candidate up to the suffix ceiling is taken.
    #[error("No free service name for '{base}' up to suffix {ceiling}")]
    NameSpaceExhausted { base: String, ceiling: u32 },
}

impl ServiceError {
    pub fn registration_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RegistrationFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn name_conflict(name: impl Into<String>) -> Self {
        Self::NameConflict { name: name.into() }
    }

    pub fn already_exists(name: impl Into<String>) -> Self {
        Self::AlreadyExists { name: name.into() }
    }

    pub fn marked_for_deletion(name: impl Into<String>) -> Self {
        Self::MarkedForDeletion { name: name.into() }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn invalid_transition(
        name: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            name: name.into(),
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Result type for service-manager operations.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
