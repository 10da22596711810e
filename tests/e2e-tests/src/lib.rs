// E2E test support for the service helper

use dsvc_common::{PollPolicy, ServerInstance};
use dsvc_process_file::{Liveness, LivenessCheck, LockFileProbe};
use dsvc_service_management::config::PollConfig;
use dsvc_service_management::{service_manager, ServiceHelper, ServiceHelperConfig, DEFAULT_CONFIG_FILE};
use std::env;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// File the fake server writes once it holds the lock.
pub fn ready_file(instance_dir: &Path) -> PathBuf {
    instance_dir.join("logs").join("fake-server.ready")
}

/// File that asks a running fake server to exit.
pub fn stop_request_file(instance_dir: &Path) -> PathBuf {
    instance_dir.join("locks").join("stop-request")
}

/// Path to the dsvc-service binary next to the test executable, if it was built.
pub fn dsvc_service_path() -> Option<PathBuf> {
    let mut path = env::current_exe().ok()?.parent()?.to_path_buf();

    // If we're in deps/, go up one level
    if path.ends_with("deps") {
        path.pop();
    }

    #[cfg(windows)]
    path.push("dsvc-service.exe");

    #[cfg(not(windows))]
    path.push("dsvc-service");

    path.exists().then_some(path)
}

/// Configuration with short polls, driving `fake_server` for `instance_dir`.
pub fn fast_config(fake_server: &Path, instance_dir: &Path) -> ServiceHelperConfig {
    let fake = fake_server.to_string_lossy().into_owned();
    let dir = instance_dir.to_string_lossy().into_owned();
    let quick = PollConfig::from(PollPolicy::new(
        Duration::from_millis(100),
        Duration::from_millis(100),
        50,
    ));

    let mut config = ServiceHelperConfig::default();
    config.commands.start = vec![fake.clone(), "run".to_string(), dir.clone()];
    config.commands.stop = vec![fake, "stop".to_string(), dir];
    config.supervisor.terminate = PollPolicy::immediate(Duration::from_millis(100), 50).into();
    config.supervisor.stop_confirm = PollPolicy::immediate(Duration::from_millis(100), 50).into();
    config.lifecycle.start_poll = quick;
    config.lifecycle.stop_poll = quick;
    config.registry.store_file = Some(PathBuf::from("config/services.json"));
    config.registry.uninstall_stop_pause = Duration::from_millis(10);
    config
}

/// A throwaway instance directory with the layout the server expects.
pub struct InstanceFixture {
    _temp: TempDir,
    dir: PathBuf,
    pub config: ServiceHelperConfig,
}

impl InstanceFixture {
    pub fn new(fake_server: &Path) -> Self {
        let temp = TempDir::new().expect("Failed to create instance directory");
        let dir = temp.path().to_path_buf();
        for sub in ["locks", "logs", "config"] {
            std::fs::create_dir_all(dir.join(sub)).expect("Failed to create instance layout");
        }
        // The server owns the lock file; it exists from installation on
        std::fs::File::create(dir.join("locks").join("server.lock"))
            .expect("Failed to create lock file");

        let config = fast_config(fake_server, &dir);
        Self {
            _temp: temp,
            dir,
            config,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn instance(&self) -> ServerInstance {
        self.config.instance(self.dir.clone())
    }

    /// Write the configuration where the binary looks for it.
    pub fn write_config(&self) -> PathBuf {
        let path = self.dir.join(DEFAULT_CONFIG_FILE);
        let yaml = serde_yaml::to_string(&self.config).expect("Failed to serialize configuration");
        std::fs::write(&path, yaml).expect("Failed to write configuration");
        path
    }

    /// Helper registering `executable` in the instance's JSON service store.
    pub fn helper(&self, executable: &Path) -> ServiceHelper {
        let manager = service_manager(&self.config, Some(&self.dir));
        ServiceHelper::new(self.config.clone(), executable, manager)
    }

    pub fn server_running(&self) -> bool {
        matches!(
            LockFileProbe::for_instance(&self.instance()).check(),
            Ok(Liveness::Running)
        )
    }
}

/// Poll `condition` every 50ms until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    condition()
}

/// Async variant of [`wait_until`].
pub async fn wait_until_async(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}
