//! `launch` and `stop` against a real server process.

use dsvc_process::{LaunchOutcome, StopOutcome};
use dsvc_service_management::{CommandOutcome, RunningOutcome};
use e2e_tests::{ready_file, wait_until_async, InstanceFixture};
use std::path::Path;
use std::time::Duration;

const FAKE_SERVER: &str = env!("CARGO_BIN_EXE_fake-server");

#[tokio::test(flavor = "multi_thread")]
async fn test_launch_records_pid_and_stop_terminates() {
    let fixture = InstanceFixture::new(Path::new(FAKE_SERVER));
    let helper = fixture.helper(Path::new("dsvc-service"));
    let dir = fixture.dir();

    assert_eq!(helper.is_running(dir), RunningOutcome::NotRunning);

    let launched = helper.launch(dir).await;
    let LaunchOutcome::Launched { pid } = launched else {
        panic!("launch failed: {:?}", launched);
    };
    assert_eq!(launched.exit_code(), 0);

    let recorded = std::fs::read_to_string(fixture.instance().pid_file()).unwrap();
    assert_eq!(recorded.trim(), pid.to_string());

    assert!(
        wait_until_async(Duration::from_secs(10), || fixture.server_running()).await,
        "fake server never took the lock"
    );
    assert!(ready_file(dir).exists());
    assert_eq!(helper.is_running(dir).exit_code(), 0);

    let stopped = helper.stop(dir).await;
    assert_eq!(stopped, StopOutcome::Stopped { pid });
    assert_eq!(stopped.exit_code(), 0);
    assert!(!fixture.instance().pid_file().exists());
    assert_eq!(helper.is_running(dir), RunningOutcome::NotRunning);

    let again = helper.stop(dir).await;
    assert_eq!(again, StopOutcome::NothingToStop);
    assert_eq!(again.exit_code(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_launch_of_missing_program_fails() {
    let mut fixture = InstanceFixture::new(Path::new(FAKE_SERVER));
    fixture.config.commands.start = vec![fixture
        .dir()
        .join("bin")
        .join("no-such-server")
        .to_string_lossy()
        .into_owned()];
    let helper = fixture.helper(Path::new("dsvc-service"));

    let outcome = helper.launch(fixture.dir()).await;
    assert!(matches!(outcome, LaunchOutcome::SpawnFailed { .. }));
    assert_eq!(outcome.exit_code(), 1);
    assert!(!fixture.instance().pid_file().exists());
}
