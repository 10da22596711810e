use super::*;
use anyhow::{anyhow, Result};

/// Validate the complete configuration
pub fn validate_config(config: &ServiceHelperConfig) -> Result<()> {
    validate_instance(&config.instance)?;
    validate_commands(&config.commands)?;
    validate_supervisor(&config.supervisor)?;
    validate_lifecycle(&config.lifecycle)?;
    validate_registry(&config.registry)?;
    validate_logging(&config.logging)?;
    Ok(())
}

fn validate_instance(instance: &InstanceConfig) -> Result<()> {
    if instance.pid_file.as_os_str().is_empty() {
        return Err(anyhow!("instance.pid_file cannot be empty"));
    }
    if instance.lock_file.as_os_str().is_empty() {
        return Err(anyhow!("instance.lock_file cannot be empty"));
    }
    Ok(())
}

fn validate_commands(commands: &CommandsConfig) -> Result<()> {
    for (name, argv) in [("start", &commands.start), ("stop", &commands.stop)] {
        match argv.first() {
            None => return Err(anyhow!("commands.{} cannot be empty", name)),
            Some(program) if program.trim().is_empty() => {
                return Err(anyhow!("commands.{} has an empty program", name))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn validate_poll(name: &str, poll: &PollConfig) -> Result<()> {
    if poll.max_attempts == 0 {
        return Err(anyhow!("{}.max_attempts must be at least 1", name));
    }
    Ok(())
}

fn validate_supervisor(supervisor: &SupervisorConfig) -> Result<()> {
    if supervisor.max_command_line == 0 {
        return Err(anyhow!("supervisor.max_command_line must be greater than 0"));
    }
    validate_poll("supervisor.pid_delete", &supervisor.pid_delete)?;
    validate_poll("supervisor.terminate", &supervisor.terminate)?;
    validate_poll("supervisor.stop_confirm", &supervisor.stop_confirm)?;
    Ok(())
}

/// A pending report must be renewed before its wait hint runs out, so the
/// hint has to cover the longest sleep of the poll behind it.
fn validate_wait_hint(name: &str, hint: Duration, poll_name: &str, poll: &PollConfig) -> Result<()> {
    let longest = poll.initial_delay.max(poll.interval);
    if hint <= longest {
        return Err(anyhow!(
            "lifecycle.wait_hints.{} ({:?}) must exceed the delays of {} ({:?})",
            name,
            hint,
            poll_name,
            longest
        ));
    }
    Ok(())
}

fn validate_lifecycle(lifecycle: &LifecycleConfig) -> Result<()> {
    validate_poll("lifecycle.start_poll", &lifecycle.start_poll)?;
    validate_poll("lifecycle.stop_poll", &lifecycle.stop_poll)?;

    let hints = &lifecycle.wait_hints;
    if hints.create_event.is_zero() {
        return Err(anyhow!("lifecycle.wait_hints.create_event must be greater than 0"));
    }
    validate_wait_hint("start", hints.start, "lifecycle.start_poll", &lifecycle.start_poll)?;
    validate_wait_hint("stop", hints.stop, "lifecycle.stop_poll", &lifecycle.stop_poll)?;
    Ok(())
}

fn validate_registry(registry: &RegistryConfig) -> Result<()> {
    if registry.enumerate_buffer == 0 {
        return Err(anyhow!("registry.enumerate_buffer must be greater than 0"));
    }
    if registry.max_name_suffix < 2 {
        return Err(anyhow!(
            "registry.max_name_suffix must be at least 2, got: {}",
            registry.max_name_suffix
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<()> {
    match logging.level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(anyhow!(
            "Invalid log level: {}, must be one of: trace, debug, info, warn, error",
            logging.level
        )),
    }
}
