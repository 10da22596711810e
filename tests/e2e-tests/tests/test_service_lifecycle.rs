//! A full service run: registration, start, STOP control, STOPPED.

use dsvc_service_lifecycle::{InProcessServiceHost, ServiceOutcome};
use dsvc_service_management::{CommandOutcome, CreateOutcome, StartOutcome};
use dsvc_service_state::{ControlCode, ServiceExitCode, ServiceState};
use e2e_tests::{wait_until_async, InstanceFixture};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const FAKE_SERVER: &str = env!("CARGO_BIN_EXE_fake-server");

#[tokio::test(flavor = "multi_thread")]
async fn test_service_starts_server_and_stops_on_control() {
    let fixture = InstanceFixture::new(Path::new(FAKE_SERVER));
    let helper = Arc::new(fixture.helper(Path::new("dsvc-service")));
    let dir = fixture.dir().to_path_buf();

    assert!(matches!(
        helper.create(&dir, "OpenDS", "Directory server"),
        CreateOutcome::Created { .. }
    ));

    let host = InProcessServiceHost::new();
    let run = {
        let helper = helper.clone();
        let host = host.clone();
        let dir = dir.clone();
        tokio::spawn(async move { helper.start(&dir, Arc::new(host)).await })
    };

    assert!(
        wait_until_async(Duration::from_secs(15), || host
            .states()
            .contains(&ServiceState::Running))
        .await,
        "service never reported RUNNING: {:?}",
        host.states()
    );
    assert!(fixture.server_running());
    assert_eq!(host.registered_name().unwrap().as_str(), "OpenDS");

    assert!(host.send(ControlCode::Stop));
    let outcome = tokio::time::timeout(Duration::from_secs(15), run)
        .await
        .expect("service run did not end")
        .unwrap();

    assert_eq!(outcome, StartOutcome::Ran(ServiceOutcome::Stopped));
    assert_eq!(outcome.exit_code(), 0);
    assert!(!fixture.server_running());

    let states = host.states();
    assert_eq!(states.first(), Some(&ServiceState::StartPending));
    assert_eq!(states.last(), Some(&ServiceState::Stopped));
    assert!(states.contains(&ServiceState::StopPending));
    assert_eq!(host.last_report().unwrap().checkpoint, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_that_never_locks_is_a_start_failure() {
    let mut fixture = InstanceFixture::new(Path::new(FAKE_SERVER));
    // The stop mode exits at once without taking the lock
    fixture.config.commands.start = fixture.config.commands.stop.clone();
    fixture.config.lifecycle.start_poll.max_attempts = 5;
    let helper = fixture.helper(Path::new("dsvc-service"));
    let dir = fixture.dir();
    helper.create(dir, "OpenDS", "Directory server");

    let host = InProcessServiceHost::new();
    let outcome = helper.start(dir, Arc::new(host.clone())).await;

    assert!(matches!(
        outcome,
        StartOutcome::Ran(ServiceOutcome::StartFailed { .. })
    ));
    assert_eq!(outcome.exit_code(), 0);

    let last = host.last_report().unwrap();
    assert_eq!(last.state, ServiceState::Stopped);
    assert_eq!(last.exit_code, ServiceExitCode::ServiceSpecific(1));
    assert!(!host.states().contains(&ServiceState::Running));
}
