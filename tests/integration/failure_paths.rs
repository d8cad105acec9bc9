// tests/integration/failure_paths.rs
use live_attendance::capture::DeviceError;
use live_attendance::network::{ChannelState, ConnectError};
use live_attendance::{AttendanceError, SessionNotification};

use crate::common::{closed_port_base, FakeBackend, FakeCamera, RecognitionPeer, TestContext};

#[test_log::test(tokio::test)]
async fn test_camera_denied_opens_nothing() {
    let peer = RecognitionPeer::spawn().await;
    let ctx = TestContext::with(&peer.ws_base, FakeBackend::new(), FakeCamera::denied());

    let result = ctx.controller.start(7).await;

    assert!(matches!(result, Err(AttendanceError::Device(DeviceError::PermissionDenied))));
    assert_eq!(ctx.backend.open_calls(), 0);
    assert!(ctx.backend.ended().is_empty());
    assert!(peer.log.paths.lock().is_empty());
    assert_eq!(ctx.controller.channel_state(), ChannelState::Idle);
    assert!(ctx.controller.session().is_none());
}

#[test_log::test(tokio::test)]
async fn test_session_open_failure_releases_camera() {
    let peer = RecognitionPeer::spawn().await;
    let ctx = TestContext::with(&peer.ws_base, FakeBackend::failing_open(), FakeCamera::new());

    let result = ctx.controller.start(7).await;

    assert!(matches!(result, Err(AttendanceError::Api(_))));
    assert_eq!(ctx.camera.opens(), 1);
    assert_eq!(ctx.camera.stops(), 1);
    assert!(!ctx.controller.is_camera_live());
    assert!(ctx.backend.ended().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_connect_failure_releases_camera_and_ends_session() {
    let mut ctx = TestContext::new(&closed_port_base());

    let result = ctx.controller.start(7).await;

    assert!(matches!(result, Err(AttendanceError::Connect(ConnectError::ConnectionFailed(_)))));
    assert_eq!(ctx.camera.stops(), 1);
    assert_eq!(ctx.backend.ended().len(), 1);
    assert_eq!(ctx.controller.channel_state(), ChannelState::Closed);
    assert!(ctx.controller.session().is_none());
    assert!(ctx
        .drain_notifications()
        .iter()
        .any(|n| matches!(n, SessionNotification::ConnectionError(_))));

    // Nothing left to stop.
    assert!(ctx.controller.stop().await.expect("Stop failed").is_none());
    assert_eq!(ctx.backend.ended().len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_stop_without_session_is_a_no_op() {
    let ctx = TestContext::new(&closed_port_base());
    assert!(ctx.controller.stop().await.expect("Stop failed").is_none());
    assert!(ctx.backend.ended().is_empty());
    assert_eq!(ctx.camera.stops(), 0);
}

#[test_log::test(tokio::test)]
async fn test_drop_with_active_session_releases_camera() {
    let peer = RecognitionPeer::spawn().await;
    let ctx = TestContext::new(&peer.ws_base);
    ctx.controller.start(7).await.expect("Failed to start session");

    let camera = ctx.camera.clone();
    let backend = ctx.backend.clone();
    drop(ctx);

    assert_eq!(camera.stops(), 1);
    assert!(crate::common::eventually(|| backend.ended().len() == 1).await);
}
