//! # dsvc Service Registry
//!
//! Registration of directory server instances with the OS service manager.
//!
//! This crate provides:
//! - The [`ServiceManager`] capability over the OS service database
//! - An in-memory implementation (thread-safe with DashMap)
//! - A JSON-file implementation for hosts without a service database
//! - The Windows SCM implementation
//! - [`ServiceRegistry`]: lookup by command, unique naming, install and uninstall

pub mod file;
pub mod registry;
pub mod scm;
pub mod storage;
pub mod types;
#[cfg(windows)]
pub mod windows;

// Re-export commonly used items
pub use file::JsonFileServiceManager;
pub use registry::{
    RegistrySettings, ServiceRegistry, DEFAULT_ENUMERATE_BUFFER, DEFAULT_MAX_NAME_SUFFIX,
    DEFAULT_UNINSTALL_STOP_PAUSE,
};
pub use scm::ServiceManager;
pub use storage::InMemoryServiceManager;
pub use types::{Enumeration, Removal, ServiceDescriptor, ServiceRegistration};
#[cfg(windows)]
pub use windows::ScmServiceManager;
