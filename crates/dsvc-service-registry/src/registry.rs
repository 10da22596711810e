//! ServiceRegistry - naming, install and uninstall of service registrations.

use crate::scm::ServiceManager;
use crate::types::{Enumeration, Removal, ServiceDescriptor, ServiceRegistration};
use dsvc_common::{Clock, ServiceError, ServiceName, ServiceResult, TokioClock};
use dsvc_service_state::ServiceState;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Initial enumeration buffer size in bytes.
pub const DEFAULT_ENUMERATE_BUFFER: usize = 16 * 1024;

/// Highest numeric suffix tried when allocating a service name.
pub const DEFAULT_MAX_NAME_SUFFIX: u32 = 9999;

/// Pause between asking a running service to stop and deleting it.
pub const DEFAULT_UNINSTALL_STOP_PAUSE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySettings {
    pub enumerate_buffer: usize,
    pub max_name_suffix: u32,
    pub uninstall_stop_pause: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            enumerate_buffer: DEFAULT_ENUMERATE_BUFFER,
            max_name_suffix: DEFAULT_MAX_NAME_SUFFIX,
            uninstall_stop_pause: DEFAULT_UNINSTALL_STOP_PAUSE,
        }
    }
}

/// Service registrations of directory server instances.
///
/// Nothing is cached: every operation asks the service manager again.
#[derive(Clone)]
pub struct ServiceRegistry {
    manager: Arc<dyn ServiceManager>,
    settings: RegistrySettings,
    clock: Arc<dyn Clock>,
}

impl ServiceRegistry {
    pub fn new(manager: Arc<dyn ServiceManager>, settings: RegistrySettings) -> Self {
        Self::with_clock(manager, settings, Arc::new(TokioClock))
    }

    pub fn with_clock(
        manager: Arc<dyn ServiceManager>,
        settings: RegistrySettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            manager,
            settings,
            clock,
        }
    }

    /// List every registration.
    ///
    /// When the first buffer is too small the call is repeated exactly once
    /// with the size the service manager asked for.
    pub fn list_services(&self) -> ServiceResult<Vec<ServiceDescriptor>> {
        let provided = self.settings.enumerate_buffer;
        let required = match self.manager.enumerate_services(provided)? {
            Enumeration::Complete(services) => return Ok(services),
            Enumeration::BufferTooSmall { required } => required,
        };

        let grown = required.max(provided);
        debug!("Service list needs {} bytes, retrying once", grown);
        match self.manager.enumerate_services(grown)? {
            Enumeration::Complete(services) => Ok(services),
            Enumeration::BufferTooSmall { required } => {
                error!("Service list still does not fit in {} bytes", grown);
                Err(ServiceError::BufferTooSmall {
                    provided: grown,
                    required,
                })
            }
        }
    }

    /// Name of the service running `command_to_run` (compared case-insensitively).
    pub fn find_service_name(&self, command_to_run: &str) -> ServiceResult<Option<ServiceName>> {
        let found = self
            .list_services()?
            .into_iter()
            .find(|service| service.runs(command_to_run))
            .map(|service| service.service_name);

        match &found {
            Some(name) => debug!("Command '{}' is registered as '{}'", command_to_run, name),
            None => debug!("No service runs '{}'", command_to_run),
        }
        Ok(found)
    }

    /// Whether a registration named `name` exists.
    pub fn name_in_use(&self, name: &ServiceName) -> ServiceResult<bool> {
        let services = self.list_services()?;
        Ok(Self::is_taken(&services, name))
    }

    /// First free name among `base`, `base-2`, `base-3`, ... up to the suffix ceiling.
    pub fn allocate_unique_name(&self, base: &str) -> ServiceResult<ServiceName> {
        let services = self.list_services()?;

        for attempt in 1..=self.settings.max_name_suffix {
            let candidate = ServiceName::with_suffix(base, attempt);
            if !Self::is_taken(&services, &candidate) {
                debug!("Allocated service name '{}'", candidate);
                return Ok(candidate);
            }
        }

        Err(ServiceError::NameSpaceExhausted {
            base: base.to_string(),
            ceiling: self.settings.max_name_suffix,
        })
    }

    // Windows compares service names case-insensitively.
    fn is_taken(services: &[ServiceDescriptor], name: &ServiceName) -> bool {
        services
            .iter()
            .any(|service| service.service_name.as_str().eq_ignore_ascii_case(name.as_str()))
    }

    /// Register `command_to_run` under a unique name derived from `display_name`.
    ///
    /// Fails with `AlreadyExists` without touching the service database when
    /// a registration already runs the same command.
    pub fn install(
        &self,
        display_name: &str,
        description: &str,
        command_to_run: &str,
    ) -> ServiceResult<ServiceName> {
        if let Some(existing) = self.find_service_name(command_to_run)? {
            info!("Service '{}' already runs '{}'", existing, command_to_run);
            return Err(ServiceError::already_exists(existing.as_str()));
        }

        let service_name = self.allocate_unique_name(display_name)?;
        let registration = ServiceRegistration {
            service_name: service_name.clone(),
            display_name: service_name.as_str().to_string(),
            command_to_run: command_to_run.to_string(),
        };

        info!("Creating service '{}'", service_name);
        self.manager.create_service(&registration).map_err(|e| {
            error!("Failed to create service '{}': {}", service_name, e);
            e
        })?;

        self.manager
            .set_description(&service_name, description)
            .map_err(|e| {
                error!("Failed to describe service '{}': {}", service_name, e);
                e
            })?;

        Ok(service_name)
    }

    /// Remove a registration, asking it to stop first when it is not stopped.
    ///
    /// The stop is followed by a single fixed pause, not a poll.
    pub async fn uninstall(&self, name: &ServiceName) -> ServiceResult<Removal> {
        info!("Removing service '{}'", name);
        let state = self.manager.query_state(name)?;

        if state != ServiceState::Stopped {
            debug!("Service '{}' is {}, requesting stop", name, state);
            if let Err(e) = self.manager.request_stop(name) {
                warn!("Failed to stop service '{}': {}", name, e);
                return Removal::from_delete_error(e);
            }
            self.clock.sleep(self.settings.uninstall_stop_pause).await;
        }

        match self.manager.delete_service(name) {
            Ok(()) => {
                info!("Service '{}' deleted", name);
                Ok(Removal::Deleted)
            }
            Err(e) => {
                warn!("Failed to delete service '{}': {}", name, e);
                Removal::from_delete_error(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryServiceManager;
    use dsvc_common::ManualClock;

    const COMMAND: &str = r#""C:\opends\bat\dsvc.exe" start "C:\opends""#;

    fn registry_with(manager: Arc<InMemoryServiceManager>) -> (ServiceRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let registry = ServiceRegistry::with_clock(manager, RegistrySettings::default(), clock.clone());
        (registry, clock)
    }

    #[test]
    fn test_allocate_skips_taken_names() {
        let manager = Arc::new(
            InMemoryServiceManager::new()
                .with_service("svc", "svc", "a")
                .with_service("svc-2", "svc-2", "b")
                .with_service("svc-3", "svc-3", "c"),
        );
        let (registry, _) = registry_with(manager);

        assert_eq!(registry.allocate_unique_name("svc").unwrap().as_str(), "svc-4");
        assert_eq!(registry.allocate_unique_name("other").unwrap().as_str(), "other");
    }

    #[test]
    fn test_allocate_stops_at_ceiling() {
        let mut manager = InMemoryServiceManager::new();
        for attempt in 1..=5 {
            let name = ServiceName::with_suffix("svc", attempt);
            manager = manager.with_service(name.as_str(), name.as_str(), name.as_str());
        }
        let settings = RegistrySettings {
            max_name_suffix: 5,
            ..Default::default()
        };
        let registry = ServiceRegistry::new(Arc::new(manager), settings);

        assert_eq!(
            registry.allocate_unique_name("svc"),
            Err(ServiceError::NameSpaceExhausted {
                base: "svc".to_string(),
                ceiling: 5
            })
        );
    }

    #[test]
    fn test_list_retries_once_with_larger_buffer() {
        let manager = Arc::new(
            InMemoryServiceManager::new()
                .with_service("a", "a", "a")
                .with_service("b", "b", "b")
                .with_bytes_per_service(DEFAULT_ENUMERATE_BUFFER),
        );
        let (registry, _) = registry_with(manager.clone());

        assert_eq!(registry.list_services().unwrap().len(), 2);
        assert_eq!(
            manager.enumerate_calls(),
            vec![DEFAULT_ENUMERATE_BUFFER, 2 * DEFAULT_ENUMERATE_BUFFER]
        );
    }

    #[test]
    fn test_list_fails_when_still_too_small() {
        let manager = Arc::new(
            InMemoryServiceManager::new()
                .with_service("a", "a", "a")
                .with_bytes_per_service(DEFAULT_ENUMERATE_BUFFER * 2)
                .with_growing_list(),
        );
        let (registry, _) = registry_with(manager.clone());

        assert!(matches!(
            registry.list_services(),
            Err(ServiceError::BufferTooSmall { .. })
        ));
        assert_eq!(manager.enumerate_calls().len(), 2);
    }

    #[test]
    fn test_find_service_name_is_case_insensitive() {
        let manager = Arc::new(InMemoryServiceManager::new().with_service("OpenDS", "OpenDS", COMMAND));
        let (registry, _) = registry_with(manager);

        let found = registry.find_service_name(&COMMAND.to_lowercase()).unwrap();
        assert_eq!(found, Some(ServiceName::from("OpenDS")));
        assert_eq!(registry.find_service_name("other").unwrap(), None);
        assert!(registry.name_in_use(&ServiceName::from("OpenDS")).unwrap());
        assert!(!registry.name_in_use(&ServiceName::from("OpenDS-2")).unwrap());
    }

    #[test]
    fn test_install_allocates_name_and_describes() {
        let manager = Arc::new(InMemoryServiceManager::new().with_service("OpenDS", "OpenDS", "other"));
        let (registry, _) = registry_with(manager.clone());

        let name = registry.install("OpenDS", "Directory server", COMMAND).unwrap();

        assert_eq!(name.as_str(), "OpenDS-2");
        assert_eq!(manager.description(&name).as_deref(), Some("Directory server"));
        assert_eq!(registry.find_service_name(COMMAND).unwrap(), Some(name));
    }

    #[test]
    fn test_install_same_command_is_already_exists() {
        let manager = Arc::new(InMemoryServiceManager::new().with_service("OpenDS", "OpenDS", COMMAND));
        let (registry, _) = registry_with(manager.clone());

        assert_eq!(
            registry.install("Another", "desc", COMMAND),
            Err(ServiceError::already_exists("OpenDS"))
        );
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_install_surfaces_duplicate_name() {
        let manager = Arc::new(InMemoryServiceManager::new());
        manager.reject_next_create(ServiceError::name_conflict("OpenDS"));
        let (registry, _) = registry_with(manager.clone());

        assert!(matches!(
            registry.install("OpenDS", "desc", COMMAND),
            Err(ServiceError::NameConflict { .. })
        ));
        assert_eq!(manager.len(), 0);
    }

    #[tokio::test]
    async fn test_uninstall_running_service_stops_then_pauses_once() {
        let manager = Arc::new(InMemoryServiceManager::new().with_service("OpenDS", "OpenDS", COMMAND));
        manager.set_state(&ServiceName::from("OpenDS"), ServiceState::Running);
        let (registry, clock) = registry_with(manager.clone());

        let removal = registry.uninstall(&ServiceName::from("OpenDS")).await.unwrap();

        assert_eq!(removal, Removal::Deleted);
        assert_eq!(manager.stop_requests(), 1);
        assert_eq!(clock.sleeps(), vec![DEFAULT_UNINSTALL_STOP_PAUSE]);
        assert_eq!(manager.len(), 0);
    }

    #[tokio::test]
    async fn test_uninstall_stopped_service_skips_stop() {
        let manager = Arc::new(InMemoryServiceManager::new().with_service("OpenDS", "OpenDS", COMMAND));
        let (registry, clock) = registry_with(manager.clone());

        assert_eq!(registry.uninstall(&ServiceName::from("OpenDS")).await, Ok(Removal::Deleted));
        assert_eq!(manager.stop_requests(), 0);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_uninstall_marked_for_deletion() {
        let manager = Arc::new(InMemoryServiceManager::new().with_service("OpenDS", "OpenDS", COMMAND));
        let name = ServiceName::from("OpenDS");
        manager.hold_open(&name);
        let (registry, _) = registry_with(manager.clone());

        assert_eq!(registry.uninstall(&name).await, Ok(Removal::MarkedForDeletion));
        // A second attempt sees the pending deletion too
        assert_eq!(registry.uninstall(&name).await, Ok(Removal::MarkedForDeletion));
    }

    #[tokio::test]
    async fn test_uninstall_unknown_service() {
        let (registry, _) = registry_with(Arc::new(InMemoryServiceManager::new()));

        assert_eq!(
            registry.uninstall(&ServiceName::from("missing")).await,
            Err(ServiceError::not_found("missing"))
        );
    }
}
