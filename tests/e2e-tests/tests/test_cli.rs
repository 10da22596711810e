//! The dsvc-service binary, driven through its command line.
//!
//! Skipped when the binary has not been built next to the tests
//! (build the workspace first: `cargo build --workspace`).

use e2e_tests::{dsvc_service_path, wait_until, InstanceFixture};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

const FAKE_SERVER: &str = env!("CARGO_BIN_EXE_fake-server");

fn dsvc_service() -> Option<PathBuf> {
    let path = dsvc_service_path();
    if path.is_none() {
        println!("dsvc-service binary not built, skipping");
    }
    path
}

fn run(binary: &Path, args: &[&str]) -> Output {
    Command::new(binary)
        .args(args)
        .output()
        .expect("Failed to run dsvc-service")
}

fn code(output: &Output) -> i32 {
    output.status.code().expect("dsvc-service was killed")
}

#[test]
fn test_create_state_remove_round() {
    let Some(binary) = dsvc_service() else { return };
    let fixture = InstanceFixture::new(Path::new(FAKE_SERVER));
    fixture.write_config();
    let dir = fixture.dir().to_str().unwrap();

    let created = run(&binary, &["create", dir, "OpenDS", "Directory server"]);
    assert_eq!(code(&created), 0, "{}", String::from_utf8_lossy(&created.stderr));

    let state = run(&binary, &["state", dir]);
    assert_eq!(code(&state), 0);
    assert_eq!(String::from_utf8_lossy(&state.stdout).trim(), "OpenDS");

    assert_eq!(code(&run(&binary, &["create", dir, "Other", "Directory server"])), 1);

    let removed = run(&binary, &["remove", dir]);
    assert_eq!(code(&removed), 0, "{}", String::from_utf8_lossy(&removed.stderr));
    assert_eq!(code(&run(&binary, &["state", dir])), 1);
    assert_eq!(code(&run(&binary, &["remove", dir])), 1);
}

#[test]
fn test_isrunning_launch_stop() {
    let Some(binary) = dsvc_service() else { return };
    let fixture = InstanceFixture::new(Path::new(FAKE_SERVER));
    fixture.write_config();
    let dir = fixture.dir().to_str().unwrap();

    let idle = run(&binary, &["isrunning", dir]);
    assert_eq!(code(&idle), 1);
    assert_eq!(String::from_utf8_lossy(&idle.stdout).trim(), "not running");

    assert_eq!(code(&run(&binary, &["launch", dir])), 0);
    assert!(wait_until(Duration::from_secs(10), || fixture.server_running()));
    assert_eq!(code(&run(&binary, &["isrunning", dir])), 0);

    let stopped = run(&binary, &["stop", dir]);
    assert_eq!(code(&stopped), 0, "{}", String::from_utf8_lossy(&stopped.stderr));
    assert!(!fixture.server_running());
    assert_eq!(code(&run(&binary, &["stop", dir])), 1);
}

#[test]
fn test_invalid_config_is_a_setup_failure() {
    let Some(binary) = dsvc_service() else { return };
    let fixture = InstanceFixture::new(Path::new(FAKE_SERVER));
    let config = fixture.dir().join("broken.yaml");
    std::fs::write(&config, "logging:\n  level: loud\n").unwrap();

    let output = run(
        &binary,
        &["--config", config.to_str().unwrap(), "state", fixture.dir().to_str().unwrap()],
    );
    assert_eq!(code(&output), 255);
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid log level"));
}

#[cfg(unix)]
#[test]
fn test_console_start_stops_on_sigterm() {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(binary) = dsvc_service() else { return };
    let fixture = InstanceFixture::new(Path::new(FAKE_SERVER));
    fixture.write_config();
    let dir = fixture.dir().to_str().unwrap();
    assert_eq!(code(&run(&binary, &["create", dir, "OpenDS", "Directory server"])), 0);

    let mut service = Command::new(&binary)
        .args(["start", dir])
        .spawn()
        .expect("Failed to start dsvc-service");

    assert!(
        wait_until(Duration::from_secs(15), || fixture.server_running()),
        "server never started"
    );
    // Give the console host a moment past the RUNNING report
    std::thread::sleep(Duration::from_millis(500));

    kill(Pid::from_raw(service.id() as i32), Signal::SIGTERM).unwrap();
    let status = service.wait().unwrap();

    assert_eq!(status.code(), Some(0));
    assert!(!fixture.server_running());
}
