//! The OS service-manager capability.
//!
//! Everything the registry needs from the service database goes through
//! [`ServiceManager`], so registry logic runs unchanged against the Windows
//! SCM and against the in-memory manager used in tests.

use crate::types::{Enumeration, ServiceRegistration};
use dsvc_common::{ServiceName, ServiceResult};
use dsvc_service_state::ServiceState;

/// Request/response access to the OS service database.
///
/// Error mapping expected from implementations:
/// - duplicate display name: `NameConflict`
/// - service name already registered: `AlreadyExists`
/// - delete/stop on a record already marked for deletion: `MarkedForDeletion`
/// - unknown service: `NotFound`
/// - anything else: `RegistrationFailed`
pub trait ServiceManager: Send + Sync {
    /// List own-process services, using at most `buffer_size` bytes.
    fn enumerate_services(&self, buffer_size: usize) -> ServiceResult<Enumeration>;

    fn create_service(&self, registration: &ServiceRegistration) -> ServiceResult<()>;

    fn set_description(&self, name: &ServiceName, description: &str) -> ServiceResult<()>;

    fn query_state(&self, name: &ServiceName) -> ServiceResult<ServiceState>;

    fn request_stop(&self, name: &ServiceName) -> ServiceResult<()>;

    fn delete_service(&self, name: &ServiceName) -> ServiceResult<()>;
}
