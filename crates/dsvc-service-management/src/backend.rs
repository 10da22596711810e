//! Choice of the service database behind the registry.

use crate::config::ServiceHelperConfig;
use dsvc_service_registry::{JsonFileServiceManager, ServiceManager};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Service manager for this platform.
///
/// A configured `registry.store_file` always wins; otherwise Windows uses the
/// SCM and other platforms fall back to a registry that lives for this
/// process only.
pub fn service_manager(
    config: &ServiceHelperConfig,
    instance_dir: Option<&Path>,
) -> Arc<dyn ServiceManager> {
    if let Some(store) = &config.registry.store_file {
        let path = match instance_dir {
            Some(dir) if store.is_relative() => dir.join(store),
            _ => store.clone(),
        };
        debug!("Using service store {}", path.display());
        return Arc::new(JsonFileServiceManager::new(path));
    }

    #[cfg(windows)]
    {
        Arc::new(dsvc_service_registry::ScmServiceManager::new())
    }

    #[cfg(not(windows))]
    {
        tracing::warn!("No service manager on this platform and no registry.store_file configured; registrations will not persist");
        Arc::new(dsvc_service_registry::InMemoryServiceManager::new())
    }
}
