//! Windows Service Control Manager backend.
//!
//! Status, stop, delete and description go through `windows-service`.
//! Enumeration and creation call the Win32 API directly: the registry
//! matches on the exact command line the SCM stores, so it must be written
//! and read back verbatim.

use crate::scm::ServiceManager;
use crate::types::{Enumeration, ServiceDescriptor, ServiceRegistration};
use dsvc_common::{ServiceError, ServiceName, ServiceResult};
use dsvc_service_state::ServiceState;
use tracing::debug;
use windows::core::{HSTRING, PCWSTR};
use windows::Win32::System::Services::{
    CloseServiceHandle, CreateServiceW, EnumServicesStatusExW, OpenSCManagerW,
    ENUM_SERVICE_STATUS_PROCESSW, SC_ENUM_PROCESS_INFO, SC_MANAGER_CREATE_SERVICE,
    SC_MANAGER_ENUMERATE_SERVICE, SERVICE_ALL_ACCESS, SERVICE_AUTO_START, SERVICE_ERROR_NORMAL,
    SERVICE_STATE_ALL, SERVICE_WIN32, SERVICE_WIN32_OWN_PROCESS,
};
use windows_service::service::{ServiceAccess, ServiceState as ScmState};
use windows_service::service_manager::{ServiceManager as ScmConnection, ServiceManagerAccess};

const ERROR_MORE_DATA: i32 = 234;
const ERROR_SERVICE_DOES_NOT_EXIST: i32 = 1060;
const ERROR_SERVICE_MARKED_FOR_DELETE: i32 = 1072;
const ERROR_SERVICE_EXISTS: i32 = 1073;
const ERROR_DUPLICATE_SERVICE_NAME: i32 = 1078;

/// The local Service Control Manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScmServiceManager;

impl ScmServiceManager {
    pub fn new() -> Self {
        Self
    }

    fn connect(&self, operation: &str) -> ServiceResult<ScmConnection> {
        ScmConnection::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)
            .map_err(|e| map_service_error(operation, "", e))
    }

    fn open(
        &self,
        operation: &str,
        name: &ServiceName,
        access: ServiceAccess,
    ) -> ServiceResult<windows_service::service::Service> {
        self.connect(operation)?
            .open_service(name.as_str(), access)
            .map_err(|e| map_service_error(operation, name.as_str(), e))
    }

    fn query_command(&self, scm: &ScmConnection, name: &str) -> Option<String> {
        let config = scm
            .open_service(name, ServiceAccess::QUERY_CONFIG)
            .and_then(|service| service.query_config());
        match config {
            Ok(config) => Some(config.executable_path.to_string_lossy().into_owned()),
            Err(e) => {
                debug!("Cannot read configuration of '{}': {}", name, e);
                None
            }
        }
    }
}

fn map_code(operation: &str, name: &str, code: Option<i32>, reason: String) -> ServiceError {
    match code {
        Some(ERROR_SERVICE_DOES_NOT_EXIST) => ServiceError::not_found(name),
        Some(ERROR_SERVICE_MARKED_FOR_DELETE) => ServiceError::marked_for_deletion(name),
        Some(ERROR_SERVICE_EXISTS) => ServiceError::already_exists(name),
        Some(ERROR_DUPLICATE_SERVICE_NAME) => ServiceError::name_conflict(name),
        _ => ServiceError::registration_failed(operation, reason),
    }
}

fn map_service_error(operation: &str, name: &str, error: windows_service::Error) -> ServiceError {
    let code = match &error {
        windows_service::Error::Winapi(io) => io.raw_os_error(),
        _ => None,
    };
    map_code(operation, name, code, error.to_string())
}

fn win32_code(error: &windows::core::Error) -> Option<i32> {
    let hr = error.code().0 as u32;
    // HRESULT_FROM_WIN32: facility 7, severity bit set
    (hr & 0xFFFF_0000 == 0x8007_0000).then_some((hr & 0xFFFF) as i32)
}

fn map_win32_error(operation: &str, name: &str, error: windows::core::Error) -> ServiceError {
    map_code(operation, name, win32_code(&error), error.to_string())
}

fn from_scm_state(state: ScmState) -> ServiceState {
    match state {
        ScmState::Stopped => ServiceState::Stopped,
        ScmState::StartPending => ServiceState::StartPending,
        ScmState::StopPending => ServiceState::StopPending,
        ScmState::Running => ServiceState::Running,
        ScmState::ContinuePending => ServiceState::ContinuePending,
        ScmState::PausePending => ServiceState::PausePending,
        ScmState::Paused => ServiceState::Paused,
    }
}

impl ServiceManager for ScmServiceManager {
    fn enumerate_services(&self, buffer_size: usize) -> ServiceResult<Enumeration> {
        // u64 storage keeps the entries' pointer fields aligned
        let mut storage = vec![0u64; buffer_size.div_ceil(8)];
        let mut needed = 0u32;
        let mut returned = 0u32;

        let names: Vec<(String, String)> = unsafe {
            let scm = OpenSCManagerW(PCWSTR::null(), PCWSTR::null(), SC_MANAGER_ENUMERATE_SERVICE)
                .map_err(|e| map_win32_error("open service manager", "", e))?;

            let buffer =
                std::slice::from_raw_parts_mut(storage.as_mut_ptr() as *mut u8, buffer_size);
            let result = EnumServicesStatusExW(
                scm,
                SC_ENUM_PROCESS_INFO,
                SERVICE_WIN32,
                SERVICE_STATE_ALL,
                Some(buffer),
                &mut needed,
                &mut returned,
                None,
                PCWSTR::null(),
            );
            let _ = CloseServiceHandle(scm);

            if let Err(e) = result {
                if win32_code(&e) == Some(ERROR_MORE_DATA) {
                    debug!("Service list needs {} more bytes", needed);
                    return Ok(Enumeration::BufferTooSmall {
                        required: buffer_size + needed as usize,
                    });
                }
                return Err(map_win32_error("enumerate services", "", e));
            }

            let entries = std::slice::from_raw_parts(
                storage.as_ptr() as *const ENUM_SERVICE_STATUS_PROCESSW,
                returned as usize,
            );
            entries
                .iter()
                .filter_map(|entry| {
                    let name = entry.lpServiceName.to_string().ok()?;
                    let display = entry.lpDisplayName.to_string().unwrap_or_else(|_| name.clone());
                    Some((name, display))
                })
                .collect()
        };

        let scm = self.connect("enumerate services")?;
        let services = names
            .into_iter()
            .filter_map(|(name, display)| {
                let command = self.query_command(&scm, &name)?;
                Some(ServiceDescriptor::new(name, display, command))
            })
            .collect();
        Ok(Enumeration::Complete(services))
    }

    fn create_service(&self, registration: &ServiceRegistration) -> ServiceResult<()> {
        let name = registration.service_name.as_str();
        let service_name = HSTRING::from(name);
        let display_name = HSTRING::from(registration.display_name.as_str());
        let command = HSTRING::from(registration.command_to_run.as_str());

        unsafe {
            let scm = OpenSCManagerW(PCWSTR::null(), PCWSTR::null(), SC_MANAGER_CREATE_SERVICE)
                .map_err(|e| map_win32_error("open service manager", name, e))?;

            let result = CreateServiceW(
                scm,
                &service_name,
                &display_name,
                SERVICE_ALL_ACCESS,
                SERVICE_WIN32_OWN_PROCESS,
                SERVICE_AUTO_START,
                SERVICE_ERROR_NORMAL,
                &command,
                PCWSTR::null(),
                None,
                PCWSTR::null(),
                PCWSTR::null(),
                PCWSTR::null(),
            );
            let _ = CloseServiceHandle(scm);

            let service = result.map_err(|e| map_win32_error("create service", name, e))?;
            let _ = CloseServiceHandle(service);
        }
        Ok(())
    }

    fn set_description(&self, name: &ServiceName, description: &str) -> ServiceResult<()> {
        self.open("describe service", name, ServiceAccess::CHANGE_CONFIG)?
            .set_description(description)
            .map_err(|e| map_service_error("describe service", name.as_str(), e))
    }

    fn query_state(&self, name: &ServiceName) -> ServiceResult<ServiceState> {
        let status = self
            .open("query service", name, ServiceAccess::QUERY_STATUS)?
            .query_status()
            .map_err(|e| map_service_error("query service", name.as_str(), e))?;
        Ok(from_scm_state(status.current_state))
    }

    fn request_stop(&self, name: &ServiceName) -> ServiceResult<()> {
        self.open("stop service", name, ServiceAccess::STOP)?
            .stop()
            .map(|_| ())
            .map_err(|e| map_service_error("stop service", name.as_str(), e))
    }

    fn delete_service(&self, name: &ServiceName) -> ServiceResult<()> {
        self.open("delete service", name, ServiceAccess::DELETE)?
            .delete()
            .map_err(|e| map_service_error("delete service", name.as_str(), e))
    }
}
