//! Configuration of the service helper.
//!
//! Every field has a default, so an empty file (or no file at all) yields the
//! built-in behavior.

use anyhow::{Context, Result};
use dsvc_common::{PollPolicy, ServerInstance};
use dsvc_process::SupervisorSettings;
use dsvc_service_lifecycle::{LifecycleSettings, WaitHints};
use dsvc_service_registry::RegistrySettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub mod validation;

/// Location of the configuration file inside an instance directory.
pub const DEFAULT_CONFIG_FILE: &str = "config/windows-service.yaml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceHelperConfig {
    pub instance: InstanceConfig,
    pub commands: CommandsConfig,
    pub supervisor: SupervisorConfig,
    pub lifecycle: LifecycleConfig,
    pub registry: RegistryConfig,
    pub logging: LoggingConfig,
}

/// Files of the server instance, relative to the instance directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub pid_file: PathBuf,
    pub lock_file: PathBuf,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            pid_file: PathBuf::from("logs/server.pid"),
            lock_file: PathBuf::from("locks/server.lock"),
        }
    }
}

/// Commands that start and stop the directory server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub start: Vec<String>,
    pub stop: Vec<String>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        let (start, stop) = if cfg!(windows) {
            ("bat/start-ds.bat", "bat/stop-ds.bat")
        } else {
            ("bin/start-ds", "bin/stop-ds")
        };
        Self {
            start: vec![start.to_string(), "--windowsNetStart".to_string()],
            stop: vec![stop.to_string(), "--windowsNetStop".to_string()],
        }
    }
}

impl CommandsConfig {
    pub fn start_argv(&self, instance: &ServerInstance) -> Vec<String> {
        resolve_argv(&self.start, instance)
    }

    pub fn stop_argv(&self, instance: &ServerInstance) -> Vec<String> {
        resolve_argv(&self.stop, instance)
    }
}

// A bare program name is left to the PATH lookup; a relative path with a
// directory part is taken from the instance directory.
fn resolve_argv(argv: &[String], instance: &ServerInstance) -> Vec<String> {
    let mut resolved = argv.to_vec();
    if let Some(program) = resolved.first_mut() {
        let path = Path::new(program.as_str());
        if path.is_relative() && path.components().count() > 1 {
            *program = instance.resolve(path).to_string_lossy().into_owned();
        }
    }
    resolved
}

/// A bounded poll: first check after `initial_delay`, then every `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(with = "duration_serde")]
    pub initial_delay: Duration,
    #[serde(with = "duration_serde")]
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollConfig {
    pub fn policy(&self) -> PollPolicy {
        PollPolicy::new(self.initial_delay, self.interval, self.max_attempts)
    }
}

impl From<PollPolicy> for PollConfig {
    fn from(policy: PollPolicy) -> Self {
        Self {
            initial_delay: policy.initial_delay,
            interval: policy.interval,
            max_attempts: policy.max_attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Longest command line handed to the OS, in characters.
    pub max_command_line: usize,
    pub pid_delete: PollConfig,
    pub terminate: PollConfig,
    pub stop_confirm: PollConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        let settings = SupervisorSettings::default();
        Self {
            max_command_line: settings.max_command_line,
            pid_delete: settings.pid_delete.into(),
            terminate: settings.terminate.into(),
            stop_confirm: settings.stop_confirm.into(),
        }
    }
}

impl SupervisorConfig {
    pub fn settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            max_command_line: self.max_command_line,
            pid_delete: self.pid_delete.policy(),
            terminate: self.terminate.policy(),
            stop_confirm: self.stop_confirm.policy(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitHintsConfig {
    #[serde(with = "duration_serde")]
    pub create_event: Duration,
    #[serde(with = "duration_serde")]
    pub start: Duration,
    #[serde(with = "duration_serde")]
    pub stop: Duration,
}

impl Default for WaitHintsConfig {
    fn default() -> Self {
        let hints = WaitHints::default();
        Self {
            create_event: hints.create_event,
            start: hints.start,
            stop: hints.stop,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub start_poll: PollConfig,
    pub stop_poll: PollConfig,
    pub wait_hints: WaitHintsConfig,
    /// Service-specific exit code reported when the server does not start.
    pub start_failure_exit_code: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        let settings = LifecycleSettings::default();
        Self {
            start_poll: settings.start_poll.into(),
            stop_poll: settings.stop_poll.into(),
            wait_hints: WaitHintsConfig::default(),
            start_failure_exit_code: settings.start_failure_exit_code,
        }
    }
}

impl LifecycleConfig {
    pub fn settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            start_poll: self.start_poll.policy(),
            stop_poll: self.stop_poll.policy(),
            wait_hints: WaitHints {
                create_event: self.wait_hints.create_event,
                start: self.wait_hints.start,
                stop: self.wait_hints.stop,
            },
            start_failure_exit_code: self.start_failure_exit_code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// First enumeration buffer, in bytes.
    pub enumerate_buffer: usize,
    pub max_name_suffix: u32,
    #[serde(with = "duration_serde")]
    pub uninstall_stop_pause: Duration,
    /// JSON service database used where the OS has no service manager.
    /// Relative paths are taken from the instance directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_file: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        let settings = RegistrySettings::default();
        Self {
            enumerate_buffer: settings.enumerate_buffer,
            max_name_suffix: settings.max_name_suffix,
            uninstall_stop_pause: settings.uninstall_stop_pause,
            store_file: None,
        }
    }
}

impl RegistryConfig {
    pub fn settings(&self) -> RegistrySettings {
        RegistrySettings {
            enumerate_buffer: self.enumerate_buffer,
            max_name_suffix: self.max_name_suffix,
            uninstall_stop_pause: self.uninstall_stop_pause,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Also write debug output to `<instanceDir>/logs/native-windows.out`.
    pub debug: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            debug: false,
        }
    }
}

impl ServiceHelperConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::load_from_string(&content)
    }

    /// Load configuration from a YAML string
    pub fn load_from_string(content: &str) -> Result<Self> {
        let has_content = content
            .lines()
            .map(str::trim)
            .any(|line| !line.is_empty() && !line.starts_with('#'));
        let config: ServiceHelperConfig = if has_content {
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?
        } else {
            ServiceHelperConfig::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Configuration for `instance_dir`: the explicit file when given, else
    /// the instance's own file when present, else the defaults.
    pub fn resolve(explicit: Option<&Path>, instance_dir: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            info!("Loading configuration from {}", path.display());
            return Self::load_from_file(path);
        }

        if let Some(dir) = instance_dir {
            let path = dir.join(DEFAULT_CONFIG_FILE);
            if path.is_file() {
                info!("Loading configuration from {}", path.display());
                return Self::load_from_file(&path);
            }
            debug!("No configuration at {}, using defaults", path.display());
        }

        Ok(Self::default())
    }

    /// Instance layout for `instance_dir` with the configured file locations.
    pub fn instance(&self, instance_dir: impl Into<PathBuf>) -> ServerInstance {
        ServerInstance::with_layout(instance_dir, &self.instance.pid_file, &self.instance.lock_file)
    }
}

// Durations are written as "500ms", "2s" or "1m"
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(s.trim()).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        let invalid = || format!("Invalid duration: {}", s);
        // "ms" before "s"
        if let Some(millis) = s.strip_suffix("ms") {
            millis.trim().parse().map(Duration::from_millis).map_err(|_| invalid())
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim().parse().map(Duration::from_secs).map_err(|_| invalid())
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| invalid())
        } else {
            Err(format!("Duration must end with 's', 'ms', or 'm': {}", s))
        }
    }
}
