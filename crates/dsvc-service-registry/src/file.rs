//! JSON-file service manager.
//!
//! Stands in for the OS service database on platforms without one. The
//! whole database is one JSON array, read on every call and rewritten after
//! every change; a process-local mutex serializes the read-modify-write.

use crate::scm::ServiceManager;
use crate::types::{Enumeration, ServiceDescriptor, ServiceRegistration};
use dsvc_common::{ServiceError, ServiceName, ServiceResult};
use dsvc_service_state::ServiceState;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredService {
    #[serde(flatten)]
    descriptor: ServiceDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    state: ServiceState,
}

impl StoredService {
    fn is(&self, name: &ServiceName) -> bool {
        self.descriptor
            .service_name
            .as_str()
            .eq_ignore_ascii_case(name.as_str())
    }
}

/// Service database persisted in a JSON file.
#[derive(Debug)]
pub struct JsonFileServiceManager {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileServiceManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> ServiceResult<Vec<StoredService>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.store_error("read service store", e)),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content).map_err(|e| self.store_error("parse service store", e))
    }

    fn save(&self, services: &[StoredService]) -> ServiceResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| self.store_error("create service store directory", e))?;
        }
        let content = serde_json::to_string_pretty(services)
            .map_err(|e| self.store_error("serialize service store", e))?;
        std::fs::write(&self.path, content).map_err(|e| self.store_error("write service store", e))?;
        debug!("Saved {} services to {}", services.len(), self.path.display());
        Ok(())
    }

    fn store_error(&self, operation: &str, error: impl std::fmt::Display) -> ServiceError {
        ServiceError::registration_failed(operation, format!("{}: {}", self.path.display(), error))
    }

    /// Apply `change` to the stored service named `name` and save.
    fn update<T>(
        &self,
        name: &ServiceName,
        change: impl FnOnce(&mut StoredService) -> T,
    ) -> ServiceResult<T> {
        let _guard = self.lock.lock();
        let mut services = self.load()?;
        let service = services
            .iter_mut()
            .find(|s| s.is(name))
            .ok_or_else(|| ServiceError::not_found(name.as_str()))?;
        let result = change(service);
        self.save(&services)?;
        Ok(result)
    }
}

impl ServiceManager for JsonFileServiceManager {
    fn enumerate_services(&self, _buffer_size: usize) -> ServiceResult<Enumeration> {
        let _guard = self.lock.lock();
        let services = self.load()?.into_iter().map(|s| s.descriptor).collect();
        Ok(Enumeration::Complete(services))
    }

    fn create_service(&self, registration: &ServiceRegistration) -> ServiceResult<()> {
        let _guard = self.lock.lock();
        let mut services = self.load()?;

        if services.iter().any(|s| s.is(&registration.service_name)) {
            return Err(ServiceError::already_exists(registration.service_name.as_str()));
        }
        if services.iter().any(|s| {
            s.descriptor
                .display_name
                .eq_ignore_ascii_case(&registration.display_name)
        }) {
            return Err(ServiceError::name_conflict(registration.display_name.as_str()));
        }

        services.push(StoredService {
            descriptor: ServiceDescriptor {
                service_name: registration.service_name.clone(),
                display_name: registration.display_name.clone(),
                command_to_run: registration.command_to_run.clone(),
            },
            description: None,
            state: ServiceState::Stopped,
        });
        self.save(&services)?;
        info!("Registered service: {}", registration.service_name);
        Ok(())
    }

    fn set_description(&self, name: &ServiceName, description: &str) -> ServiceResult<()> {
        self.update(name, |service| {
            service.description = Some(description.to_string());
        })
    }

    fn query_state(&self, name: &ServiceName) -> ServiceResult<ServiceState> {
        let _guard = self.lock.lock();
        self.load()?
            .iter()
            .find(|s| s.is(name))
            .map(|s| s.state)
            .ok_or_else(|| ServiceError::not_found(name.as_str()))
    }

    fn request_stop(&self, name: &ServiceName) -> ServiceResult<()> {
        self.update(name, |service| service.state = ServiceState::Stopped)
    }

    fn delete_service(&self, name: &ServiceName) -> ServiceResult<()> {
        let _guard = self.lock.lock();
        let mut services = self.load()?;
        let before = services.len();
        services.retain(|s| !s.is(name));
        if services.len() == before {
            return Err(ServiceError::not_found(name.as_str()));
        }
        self.save(&services)?;
        info!("Deleted service: {}", name);
        Ok(())
    }
}
