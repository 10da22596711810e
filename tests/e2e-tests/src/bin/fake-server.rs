//! Stand-in for the directory server in end-to-end tests.
//!
//! `run` holds byte 0 of the instance lock file until it is signalled or a stop
//! request file appears; `stop` drops that stop request, the way the real
//! stop script asks a running server to shut down.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dsvc_process_file::ServerLock;
use e2e_tests::{ready_file, stop_request_file};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{interval, sleep};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "fake-server")]
#[command(about = "Directory server stand-in for service helper testing", long_about = None)]
struct Args {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Hold the lock file until stopped
    Run {
        instance_dir: PathBuf,
        /// Milliseconds to wait before taking the lock
        #[arg(long, default_value = "0")]
        startup_delay_ms: u64,
    },
    /// Ask a running server to stop
    Stop { instance_dir: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    info!("Starting fake-server with args: {:?}", args);

    match args.mode {
        Mode::Run {
            instance_dir,
            startup_delay_ms,
        } => run(&instance_dir, Duration::from_millis(startup_delay_ms)).await,
        Mode::Stop { instance_dir } => {
            let path = stop_request_file(&instance_dir);
            std::fs::write(&path, "stop\n")
                .with_context(|| format!("Failed to write stop request {}", path.display()))?;
            info!("Stop requested for {}", instance_dir.display());
            Ok(())
        }
    }
}

async fn run(instance_dir: &Path, startup_delay: Duration) -> Result<()> {
    let lock_path = instance_dir.join("locks").join("server.lock");
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !startup_delay.is_zero() {
        info!("Startup delay: waiting {:?}", startup_delay);
        sleep(startup_delay).await;
    }

    let lock = ServerLock::try_acquire(&lock_path)
        .with_context(|| format!("Failed to lock {}", lock_path.display()))?
        .with_context(|| format!("Lock file {} is held by another server", lock_path.display()))?;
    std::fs::write(ready_file(instance_dir), std::process::id().to_string())?;
    info!("Fake server is running as pid {}", std::process::id());

    let stop_request = stop_request_file(instance_dir);
    let mut ticker = interval(Duration::from_millis(50));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if stop_request.exists() {
                    info!("Stop request found");
                    break;
                }
            }
            _ = shutdown_signal() => {
                info!("Fake server received signal");
                break;
            }
        }
    }

    if let Err(e) = std::fs::remove_file(&stop_request) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove stop request: {}", e);
        }
    }
    let _ = std::fs::remove_file(ready_file(instance_dir));
    drop(lock);
    info!("Fake server stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
