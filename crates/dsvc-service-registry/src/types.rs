//! Data types for the service registry.

use dsvc_common::{ServiceError, ServiceName};
use serde::{Deserialize, Serialize};

/// One registration as listed by the service manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub service_name: ServiceName,
    pub display_name: String,
    /// Command line the service manager runs to start the service.
    pub command_to_run: String,
}

impl ServiceDescriptor {
    pub fn new(
        service_name: impl Into<ServiceName>,
        display_name: impl Into<String>,
        command_to_run: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            display_name: display_name.into(),
            command_to_run: command_to_run.into(),
        }
    }

    /// Case-insensitive comparison of the command to run.
    pub fn runs(&self, command: &str) -> bool {
        self.command_to_run.eq_ignore_ascii_case(command)
    }
}

/// A registration to create: auto-start, own process, default account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRegistration {
    pub service_name: ServiceName,
    pub display_name: String,
    pub command_to_run: String,
}

/// Answer of one enumeration call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enumeration {
    Complete(Vec<ServiceDescriptor>),
    /// The list does not fit; `required` is what the service manager asked for.
    BufferTooSmall { required: usize },
}

/// Terminal state of an uninstall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Deleted,
    /// Delete accepted; the record disappears once every handle is closed.
    MarkedForDeletion,
}

impl Removal {
    pub(crate) fn from_delete_error(error: ServiceError) -> Result<Self, ServiceError> {
        match error {
            ServiceError::MarkedForDeletion { .. } => Ok(Removal::MarkedForDeletion),
            other => Err(other),
        }
    }
}
