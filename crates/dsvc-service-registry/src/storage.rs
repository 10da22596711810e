//! In-memory service manager.
//!
//! A [`ServiceManager`] backed by a `DashMap`, used wherever the real
//! service database is unavailable or undesirable (tests, non-Windows
//! hosts). Besides storing registrations it can be told to misbehave:
//! reject the next creation, fail enumeration, report a larger list than
//! fits, or keep a handle open so deletes end up marked for deletion.

use crate::scm::ServiceManager;
use crate::types::{Enumeration, ServiceDescriptor, ServiceRegistration};
use dashmap::DashMap;
use dsvc_common::{ServiceError, ServiceName, ServiceResult};
use dsvc_service_state::ServiceState;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Byte cost charged per listed service when no explicit cost is set.
const DEFAULT_BYTES_PER_SERVICE: usize = 256;

#[derive(Debug, Clone)]
struct Entry {
    descriptor: ServiceDescriptor,
    description: Option<String>,
    state: ServiceState,
    held_open: bool,
    marked_for_deletion: bool,
}

/// Thread-safe in-memory service database.
#[derive(Debug)]
pub struct InMemoryServiceManager {
    /// Keyed by lower-cased service name
    services: DashMap<String, Entry>,
    bytes_per_service: usize,
    growing_list: bool,
    enumerate_calls: Mutex<Vec<usize>>,
    enumerate_failure: Mutex<Option<ServiceError>>,
    create_rejection: Mutex<Option<ServiceError>>,
    stop_requests: AtomicUsize,
}

impl Default for InMemoryServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryServiceManager {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
            bytes_per_service: DEFAULT_BYTES_PER_SERVICE,
            growing_list: false,
            enumerate_calls: Mutex::new(Vec::new()),
            enumerate_failure: Mutex::new(None),
            create_rejection: Mutex::new(None),
            stop_requests: AtomicUsize::new(0),
        }
    }

    /// Add a stopped registration.
    pub fn with_service(self, name: &str, display_name: &str, command_to_run: &str) -> Self {
        self.services.insert(
            key(&ServiceName::from(name)),
            Entry {
                descriptor: ServiceDescriptor::new(name, display_name, command_to_run),
                description: None,
                state: ServiceState::Stopped,
                held_open: false,
                marked_for_deletion: false,
            },
        );
        self
    }

    /// Bytes each listed service takes in the enumeration buffer.
    pub fn with_bytes_per_service(mut self, bytes: usize) -> Self {
        self.bytes_per_service = bytes;
        self
    }

    /// Make the list grow between calls, so a single retry is never enough.
    pub fn with_growing_list(mut self) -> Self {
        self.growing_list = true;
        self
    }

    /// Fail every enumeration with `error` (or stop failing with `None`).
    pub fn fail_enumeration(&self, error: Option<ServiceError>) {
        *self.enumerate_failure.lock() = error;
    }

    /// Reject the next `create_service` call with `error`.
    pub fn reject_next_create(&self, error: ServiceError) {
        *self.create_rejection.lock() = Some(error);
    }

    pub fn set_state(&self, name: &ServiceName, state: ServiceState) {
        if let Some(mut entry) = self.services.get_mut(&key(name)) {
            entry.state = state;
        }
    }

    /// Simulate another process holding a handle to the service.
    pub fn hold_open(&self, name: &ServiceName) {
        if let Some(mut entry) = self.services.get_mut(&key(name)) {
            entry.held_open = true;
        }
    }

    /// Close the simulated handle; a pending deletion completes.
    pub fn release(&self, name: &ServiceName) {
        let k = key(name);
        let marked = match self.services.get_mut(&k) {
            Some(mut entry) => {
                entry.held_open = false;
                entry.marked_for_deletion
            }
            None => false,
        };
        if marked {
            self.services.remove(&k);
        }
    }

    pub fn description(&self, name: &ServiceName) -> Option<String> {
        self.services.get(&key(name)).and_then(|e| e.description.clone())
    }

    pub fn state(&self, name: &ServiceName) -> Option<ServiceState> {
        self.services.get(&key(name)).map(|e| e.state)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Buffer sizes passed to `enumerate_services`, in call order.
    pub fn enumerate_calls(&self) -> Vec<usize> {
        self.enumerate_calls.lock().clone()
    }

    pub fn stop_requests(&self) -> usize {
        self.stop_requests.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Vec<ServiceDescriptor> {
        let mut services: Vec<ServiceDescriptor> =
            self.services.iter().map(|e| e.descriptor.clone()).collect();
        services.sort_by(|a, b| a.service_name.as_str().cmp(b.service_name.as_str()));
        services
    }
}

fn key(name: &ServiceName) -> String {
    name.as_str().to_ascii_lowercase()
}

impl ServiceManager for InMemoryServiceManager {
    fn enumerate_services(&self, buffer_size: usize) -> ServiceResult<Enumeration> {
        let call = {
            let mut calls = self.enumerate_calls.lock();
            calls.push(buffer_size);
            calls.len()
        };

        if let Some(error) = self.enumerate_failure.lock().clone() {
            return Err(error);
        }

        let services = self.snapshot();
        let mut required = services.len() * self.bytes_per_service;
        if self.growing_list {
            required *= call;
        }

        if required > buffer_size {
            Ok(Enumeration::BufferTooSmall { required })
        } else {
            Ok(Enumeration::Complete(services))
        }
    }

    fn create_service(&self, registration: &ServiceRegistration) -> ServiceResult<()> {
        if let Some(error) = self.create_rejection.lock().take() {
            return Err(error);
        }

        let k = key(&registration.service_name);
        if self.services.contains_key(&k) {
            return Err(ServiceError::already_exists(registration.service_name.as_str()));
        }
        let display_taken = self.services.iter().any(|e| {
            e.descriptor
                .display_name
                .eq_ignore_ascii_case(&registration.display_name)
        });
        if display_taken {
            return Err(ServiceError::name_conflict(registration.display_name.as_str()));
        }

        self.services.insert(
            k,
            Entry {
                descriptor: ServiceDescriptor {
                    service_name: registration.service_name.clone(),
                    display_name: registration.display_name.clone(),
                    command_to_run: registration.command_to_run.clone(),
                },
                description: None,
                state: ServiceState::Stopped,
                held_open: false,
                marked_for_deletion: false,
            },
        );
        tracing::info!("Registered service: {}", registration.service_name);
        Ok(())
    }

    fn set_description(&self, name: &ServiceName, description: &str) -> ServiceResult<()> {
        let mut entry = self
            .services
            .get_mut(&key(name))
            .ok_or_else(|| ServiceError::not_found(name.as_str()))?;
        entry.description = Some(description.to_string());
        Ok(())
    }

    fn query_state(&self, name: &ServiceName) -> ServiceResult<ServiceState> {
        self.state(name)
            .ok_or_else(|| ServiceError::not_found(name.as_str()))
    }

    fn request_stop(&self, name: &ServiceName) -> ServiceResult<()> {
        let mut entry = self
            .services
            .get_mut(&key(name))
            .ok_or_else(|| ServiceError::not_found(name.as_str()))?;
        if entry.marked_for_deletion {
            return Err(ServiceError::marked_for_deletion(name.as_str()));
        }
        self.stop_requests.fetch_add(1, Ordering::SeqCst);
        entry.state = ServiceState::Stopped;
        Ok(())
    }

    fn delete_service(&self, name: &ServiceName) -> ServiceResult<()> {
        let k = key(name);
        {
            let mut entry = self
                .services
                .get_mut(&k)
                .ok_or_else(|| ServiceError::not_found(name.as_str()))?;
            if entry.marked_for_deletion || entry.held_open {
                entry.marked_for_deletion = true;
                return Err(ServiceError::marked_for_deletion(name.as_str()));
            }
        }
        self.services.remove(&k);
        tracing::info!("Deleted service: {}", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_list() {
        let manager = InMemoryServiceManager::new();
        let registration = ServiceRegistration {
            service_name: ServiceName::from("OpenDS"),
            display_name: "OpenDS".to_string(),
            command_to_run: "dsvc start /srv/ds1".to_string(),
        };

        manager.create_service(&registration).unwrap();
        assert_eq!(
            manager.create_service(&registration),
            Err(ServiceError::already_exists("OpenDS"))
        );

        match manager.enumerate_services(4096).unwrap() {
            Enumeration::Complete(services) => {
                assert_eq!(services.len(), 1);
                assert!(services[0].runs("DSVC START /srv/ds1"));
            }
            other => panic!("unexpected enumeration: {other:?}"),
        }
    }

    #[test]
    fn test_display_name_conflict() {
        let manager = InMemoryServiceManager::new().with_service("a", "Directory", "x");
        let registration = ServiceRegistration {
            service_name: ServiceName::from("b"),
            display_name: "directory".to_string(),
            command_to_run: "y".to_string(),
        };

        assert!(matches!(
            manager.create_service(&registration),
            Err(ServiceError::NameConflict { .. })
        ));
    }

    #[test]
    fn test_release_completes_pending_deletion() {
        let name = ServiceName::from("OpenDS");
        let manager = InMemoryServiceManager::new().with_service("OpenDS", "OpenDS", "x");
        manager.hold_open(&name);

        assert!(matches!(
            manager.delete_service(&name),
            Err(ServiceError::MarkedForDeletion { .. })
        ));
        assert_eq!(manager.len(), 1);

        manager.release(&name);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_enumeration_failure() {
        let manager = InMemoryServiceManager::new();
        manager.fail_enumeration(Some(ServiceError::registration_failed("enumerate", "access denied")));

        assert!(manager.enumerate_services(1024).is_err());
        manager.fail_enumeration(None);
        assert!(manager.enumerate_services(1024).is_ok());
    }
}
