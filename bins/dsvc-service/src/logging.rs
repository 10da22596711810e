use anyhow::{Context, Result};
use dsvc_service_management::config::LoggingConfig;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::warn;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Debug log inside the instance directory.
pub const DEBUG_LOG_FILE: &str = "logs/native-windows.out";

static DEBUG_LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static DEBUG_LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Path of the debug log. The first instance directory asked about wins.
pub fn debug_log_path(instance_dir: &Path) -> &'static Path {
    DEBUG_LOG_PATH.get_or_init(|| instance_dir.join(DEBUG_LOG_FILE))
}

/// Install the global subscriber: console output on stderr and, in debug
/// mode with a known instance, the instance's debug log.
pub fn initialize_logging(
    config: &LoggingConfig,
    debug_flag: bool,
    instance_dir: Option<&Path>,
) -> Result<()> {
    let debug = debug_flag || config.debug;
    let level = if debug { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let mut file_error = None;
    let file_layer = match instance_dir.filter(|_| debug) {
        Some(dir) => match open_debug_log(dir) {
            Ok(writer) => Some(fmt::layer().with_writer(writer).with_ansi(false)),
            Err(e) => {
                file_error = Some(e);
                None
            }
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(true),
        )
        .with(file_layer)
        .try_init()
        .context("Failed to install the log subscriber")?;

    if let Some(e) = file_error {
        warn!("Debug log disabled: {:#}", e);
    }
    Ok(())
}

fn open_debug_log(instance_dir: &Path) -> Result<NonBlocking> {
    let path = debug_log_path(instance_dir);
    let (Some(dir), Some(file_name)) = (path.parent(), path.file_name()) else {
        anyhow::bail!("Invalid debug log path: {}", path.display());
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name.to_string_lossy())
        .build(dir)
        .with_context(|| format!("Failed to open debug log: {}", path.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(appender);
    // Dropping the guard would stop the writer thread
    let _ = DEBUG_LOG_GUARD.set(guard);
    Ok(writer)
}
