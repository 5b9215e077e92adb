//! Background robot-mode polling behind power-on and brake release.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::time::timeout;
use ur_session::{ErrorKind, EventKind, RobotMode, RobotSession, SessionError};

/// BOOTING, BOOTING, IDLE: three queries, then the poll stops for good.
#[tokio::test(flavor = "multi_thread")]
async fn test_power_on_polls_until_idle() {
    timeout(TEST_TIMEOUT, async {
        let dashboard =
            FakeDashboard::start(mode_sequence(&["BOOTING", "BOOTING", "IDLE"], "Powering on"))
                .await;
        let script = FakeScript::start().await;
        let session = connected_session(&dashboard, &script).await;

        let wait = session.power_on().await.unwrap();
        assert_eq!(wait.target(), &RobotMode::Idle);
        assert_eq!(wait.wait().await.unwrap(), RobotMode::Idle);
        assert_eq!(dashboard.count("robotmode"), 3);

        // Many poll intervals later there are still only three queries.
        tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS * 10)).await;
        assert_eq!(
            dashboard.received(),
            vec!["power on", "robotmode", "robotmode", "robotmode"]
        );
    })
    .await
    .expect("Test timed out");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_brake_release_polls_until_running() {
    timeout(TEST_TIMEOUT, async {
        let dashboard =
            FakeDashboard::start(mode_sequence(&["IDLE", "RUNNING"], "Brake releasing")).await;
        let script = FakeScript::start().await;
        let session = connected_session(&dashboard, &script).await;

        let wait = session.brake_release().await.unwrap();
        assert_eq!(wait.wait().await.unwrap(), RobotMode::Running);
        assert_eq!(
            dashboard.received(),
            vec!["brake release", "robotmode", "robotmode"]
        );
    })
    .await
    .expect("Test timed out");
}

/// A mode that never arrives ends in a timeout carrying the last mode seen.
#[tokio::test(flavor = "multi_thread")]
async fn test_wait_times_out() {
    timeout(TEST_TIMEOUT, async {
        let dashboard = FakeDashboard::start(mode_sequence(&["POWER_OFF"], "ok")).await;
        let script = FakeScript::start().await;
        let mut config = test_config(dashboard.address.port(), script.address.port());
        config.max_wait_secs = Some(0);
        let session = RobotSession::new(config);
        session.connect().await.unwrap();

        let err = session.power_on().await.unwrap().wait().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        match err {
            SessionError::WaitTimeout { target, last, .. } => {
                assert_eq!(target, RobotMode::Idle);
                assert_eq!(last, RobotMode::PowerOff);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(dashboard.count("robotmode"), 1);
        assert!(session.is_connected());
    })
    .await
    .expect("Test timed out");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_disconnect_cancels_wait() {
    timeout(TEST_TIMEOUT, async {
        let dashboard = FakeDashboard::start(mode_sequence(&["BOOTING"], "ok")).await;
        let script = FakeScript::start().await;
        let mut config = test_config(dashboard.address.port(), script.address.port());
        config.max_wait_secs = None;
        let session = RobotSession::new(config);
        session.connect().await.unwrap();

        let wait = session.power_on().await.unwrap();
        assert!(
            wait_until(Duration::from_secs(5), || dashboard.count("robotmode") >= 2).await,
            "poll should be running"
        );

        session.disconnect().await;
        let err = wait.wait().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::WaitCancelled {
                target: RobotMode::Idle
            }
        ));

        let queries = dashboard.count("robotmode");
        tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS * 10)).await;
        assert_eq!(dashboard.count("robotmode"), queries);
    })
    .await
    .expect("Test timed out");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_handle_keeps_session_open() {
    timeout(TEST_TIMEOUT, async {
        let dashboard = FakeDashboard::start(mode_sequence(&["BOOTING"], "ok")).await;
        let script = FakeScript::start().await;
        let session = connected_session(&dashboard, &script).await;

        let wait = session.brake_release().await.unwrap();
        wait.cancel();
        let err = wait.wait().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        assert!(session.is_connected());
        assert_eq!(session.robot_mode().await.unwrap(), RobotMode::Booting);
    })
    .await
    .expect("Test timed out");
}

/// A controller that hangs up mid-poll ends the wait with the transport
/// failure instead of spinning.
#[tokio::test(flavor = "multi_thread")]
async fn test_wait_fails_when_controller_hangs_up() {
    timeout(TEST_TIMEOUT, async {
        let polls = std::sync::atomic::AtomicUsize::new(0);
        let dashboard = FakeDashboard::start(move |command| {
            if command != "robotmode" {
                return Reply::line("ok");
            }
            match polls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) {
                0 => Reply::line("Robotmode: BOOTING"),
                _ => Reply::Hangup,
            }
        })
        .await;
        let script = FakeScript::start().await;
        let session = connected_session(&dashboard, &script).await;
        let mut events = session.subscribe();

        let err = session.power_on().await.unwrap().wait().await.unwrap_err();
        assert!(err.is_transport_failure());
        assert_eq!(dashboard.count("robotmode"), 2);
        assert!(!session.is_connected());

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if let EventKind::WaitFailed { target, .. } = event.kind {
                assert_eq!(target, RobotMode::Idle);
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    })
    .await
    .expect("Test timed out");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dropped_handle_keeps_polling() {
    timeout(TEST_TIMEOUT, async {
        let dashboard =
            FakeDashboard::start(mode_sequence(&["BOOTING", "BOOTING", "IDLE"], "ok")).await;
        let script = FakeScript::start().await;
        let session = connected_session(&dashboard, &script).await;
        let mut events = session.subscribe();

        drop(session.power_on().await.unwrap());

        loop {
            let event = events.recv().await.unwrap();
            if let EventKind::ModeReached { mode } = event.kind {
                assert_eq!(mode, RobotMode::Idle);
                break;
            }
        }
        assert_eq!(dashboard.count("robotmode"), 3);
    })
    .await
    .expect("Test timed out");
}
