use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dsvc_common::ServiceName;
use dsvc_service_management::{
    service_manager, CommandOutcome, CreateOutcome, ServiceHelper, ServiceHelperConfig,
    StateOutcome,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, error, info};

mod logging;
mod service;

/// Exit code for errors outside any subcommand (configuration, runtime setup).
const EXIT_SETUP_FAILED: u8 = 255;

/// Runs a directory server instance as an OS service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (YAML); defaults to <INSTANCE_DIR>/config/windows-service.yaml
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging, also written to <INSTANCE_DIR>/logs/native-windows.out
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register the instance as a service
    Create {
        instance_dir: PathBuf,
        /// Display name; the service name is derived from it
        service_name: String,
        description: String,
    },
    /// Print the service name of the instance
    State { instance_dir: PathBuf },
    /// Remove the service of the instance
    Remove { instance_dir: PathBuf },
    /// Run the instance as a service (invoked by the service manager)
    Start { instance_dir: PathBuf },
    /// Tell whether the server holds its lock file
    #[command(name = "isrunning")]
    IsRunning { instance_dir: PathBuf },
    /// Remove a service by name
    Cleanup { service_name: String },
    /// Launch the server in the background and record its pid
    Launch { instance_dir: PathBuf },
    /// Stop the server recorded in the pid file
    Stop { instance_dir: PathBuf },
}

impl Command {
    fn instance_dir(&self) -> Option<&Path> {
        match self {
            Command::Create { instance_dir, .. }
            | Command::State { instance_dir }
            | Command::Remove { instance_dir }
            | Command::Start { instance_dir }
            | Command::IsRunning { instance_dir }
            | Command::Launch { instance_dir }
            | Command::Stop { instance_dir } => Some(instance_dir),
            Command::Cleanup { .. } => None,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(code) => {
            debug!("Exiting with {}", code);
            ExitCode::from(u8::try_from(code).unwrap_or(EXIT_SETUP_FAILED))
        }
        Err(e) => {
            // The subscriber may not be installed yet
            eprintln!("Error: {:#}", e);
            error!("{:#}", e);
            ExitCode::from(EXIT_SETUP_FAILED)
        }
    }
}

fn run(args: Args) -> Result<i32> {
    // The registered command carries an absolute instance directory
    let instance_dir = args
        .command
        .instance_dir()
        .map(std::path::absolute)
        .transpose()
        .context("Failed to resolve the instance directory")?;

    let config = ServiceHelperConfig::resolve(args.config.as_deref(), instance_dir.as_deref())?;
    logging::initialize_logging(&config.logging, args.debug, instance_dir.as_deref())?;
    debug!("Command: {:?}", args.command);

    let executable = std::env::current_exe().context("Failed to locate the helper executable")?;
    let manager = service_manager(&config, instance_dir.as_deref());
    let helper = ServiceHelper::new(config, executable, manager);

    let dir = instance_dir.as_deref().unwrap_or_else(|| Path::new(""));

    let code = match args.command {
        Command::Create {
            service_name,
            description,
            ..
        } => {
            let outcome = helper.create(dir, &service_name, &description);
            if let CreateOutcome::Created { name } = &outcome {
                info!("Service created: {}", name);
            }
            outcome.exit_code()
        }
        Command::State { .. } => {
            let outcome = helper.state(dir);
            if let StateOutcome::Registered { name } = &outcome {
                println!("{}", name);
            }
            outcome.exit_code()
        }
        Command::Start { .. } => return service::run_service(helper, dir.to_path_buf()),
        Command::Remove { .. } => block_on(helper.remove(dir))?.exit_code(),
        Command::Cleanup { service_name } => {
            block_on(helper.cleanup(&ServiceName::from(service_name)))?.exit_code()
        }
        Command::IsRunning { .. } => {
            let outcome = helper.is_running(dir);
            println!("{}", outcome);
            outcome.exit_code()
        }
        Command::Launch { .. } => {
            let outcome = block_on(helper.launch(dir))?;
            info!("Launch: {:?}", outcome);
            outcome.exit_code()
        }
        Command::Stop { .. } => {
            let outcome = block_on(helper.stop(dir))?;
            info!("Stop: {}", outcome);
            outcome.exit_code()
        }
    };

    Ok(code)
}

fn block_on<F: Future>(future: F) -> Result<F::Output> {
    Ok(service::build_runtime()?.block_on(future))
}
