// tests/integration/live_session.rs
use live_attendance::core::{FaceCounts, SessionId};
use live_attendance::network::ChannelState;
use live_attendance::overlay::StrokeColor;
use live_attendance::{AttendanceError, SessionNotification};
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::common::{eventually, RecognitionPeer, TestContext};

const GREEN: StrokeColor = StrokeColor([0, 255, 0, 255]);
const RED: StrokeColor = StrokeColor([255, 0, 0, 255]);

fn three_faces(recognized: &[i64]) -> serde_json::Value {
    json!({
        "recognized": recognized,
        "total_faces": 3,
        "face_locations": [[10, 30, 30, 10], [10, 60, 30, 40], [40, 30, 60, 10]],
        "recognition_status": [true, false, false],
        "timestamp": "2024-05-01T09:00:00.123456",
    })
}

#[test_log::test(tokio::test)]
async fn test_live_session_marks_presence_and_draws_boxes() {
    let peer = RecognitionPeer::spawn().await;
    let mut ctx = TestContext::new(&peer.ws_base);

    let session = ctx.controller.start(7).await.expect("Failed to start session");
    assert_eq!(session.session_id, SessionId(42));
    ctx.expect_notification(|n| matches!(n, SessionNotification::Connected { .. })).await;
    assert_eq!(ctx.controller.channel_state(), ChannelState::Open);
    assert_eq!(*peer.log.paths.lock(), vec!["/ws/attendance/42".to_string()]);

    // Frames flow while the channel is open.
    assert!(eventually(|| peer.log.frames() >= 2).await);

    peer.push_json(three_faces(&[2]));
    let recognized = ctx
        .expect_notification(|n| matches!(n, SessionNotification::ParticipantRecognized { .. }))
        .await;
    match recognized {
        SessionNotification::ParticipantRecognized { participant, .. } => {
            assert_eq!(participant.display_name, "Brook");
        }
        other => panic!("unexpected notification {:?}", other),
    }

    let roster = ctx.controller.roster();
    assert_eq!(roster.present_count(), 1);
    let brook = roster.get(2).expect("Brook is enrolled");
    assert!(brook.presence.recognized);
    assert!(brook.presence.first_recognized_at.is_some());
    assert_eq!(
        ctx.controller.face_counts(),
        FaceCounts { total: 3, recognized: 1, unrecognized: 2 }
    );
    assert_eq!(ctx.controller.overlay_geometry().len(), 3);

    // The next repaint strokes one green box and two red ones.
    let surface = ctx.surface.clone();
    assert!(
        eventually(|| {
            let colors: Vec<StrokeColor> = surface.lock().strokes.iter().map(|(_, c)| *c).collect();
            colors == vec![GREEN, RED, RED]
        })
        .await
    );

    // A repeated recognition neither notifies again nor moves the timestamp.
    let first_seen = brook.presence.first_recognized_at;
    peer.push_json(three_faces(&[2]));
    ctx.expect_notification(|n| matches!(n, SessionNotification::FaceCountsUpdated(_))).await;
    ctx.expect_notification(|n| matches!(n, SessionNotification::FaceCountsUpdated(_))).await;
    assert!(!ctx
        .drain_notifications()
        .iter()
        .any(|n| matches!(n, SessionNotification::ParticipantRecognized { .. })));
    assert_eq!(ctx.controller.roster().get(2).unwrap().presence.first_recognized_at, first_seen);

    // An empty recognized list never un-marks anyone.
    peer.push_json(json!({ "recognized": [], "total_faces": 0, "timestamp": "2024-05-01T09:00:05" }));
    ctx.expect_notification(|n| matches!(n, SessionNotification::FaceCountsUpdated(c) if c.total == 0))
        .await;
    assert!(ctx.controller.roster().get(2).unwrap().presence.recognized);

    let stopped = ctx.controller.stop().await.expect("Failed to stop session");
    assert_eq!(stopped.map(|s| s.session_id), Some(SessionId(42)));
    assert_eq!(ctx.backend.ended(), vec![SessionId(42)]);
    assert_eq!(ctx.camera.stops(), 1);
    assert_eq!(ctx.controller.channel_state(), ChannelState::Closed);
    assert!(ctx.controller.session().is_none());
    assert!(ctx.surface.lock().strokes.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_stop_halts_every_activity_and_is_idempotent() {
    let peer = RecognitionPeer::spawn().await;
    let ctx = TestContext::new(&peer.ws_base);

    ctx.controller.start(7).await.expect("Failed to start session");
    assert!(eventually(|| peer.log.frames() >= 1).await);

    ctx.controller.stop().await.expect("Failed to stop session");
    assert!(eventually(|| !peer.log.close_codes.lock().is_empty()).await);
    assert_eq!(peer.log.close_codes.lock()[0], Some(1000));

    let frames = peer.log.frames();
    let repaints = ctx.controller.metrics().repaints;
    let presents = ctx.surface.lock().presents;
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(peer.log.frames(), frames);
    assert_eq!(ctx.controller.metrics().repaints, repaints);
    assert_eq!(ctx.surface.lock().presents, presents);
    assert!(!ctx.controller.is_camera_live());

    assert!(ctx.controller.stop().await.expect("Second stop failed").is_none());
    assert_eq!(ctx.backend.ended().len(), 1);
    assert_eq!(ctx.camera.stops(), 1);
}

#[test_log::test(tokio::test)]
async fn test_malformed_message_keeps_previous_overlay() {
    let peer = RecognitionPeer::spawn().await;
    let mut ctx = TestContext::new(&peer.ws_base);
    ctx.controller.start(7).await.expect("Failed to start session");

    peer.push_json(three_faces(&[2]));
    ctx.expect_notification(|n| matches!(n, SessionNotification::FaceCountsUpdated(_))).await;
    let before = ctx.controller.overlay_geometry();

    peer.push_json(json!({
        "recognized": [1],
        "total_faces": 2,
        "face_locations": [[1, 2, 3, 4], [5, 6, 7, 8]],
        "recognition_status": [true],
    }));
    ctx.expect_notification(|n| matches!(n, SessionNotification::MessageDiscarded(_))).await;
    peer.script.send(Message::Text("not json".into())).expect("Failed to script message");
    ctx.expect_notification(|n| matches!(n, SessionNotification::MessageDiscarded(_))).await;
    peer.push_json(json!({ "recognized": [1], "total_faces": i64::MIN }));
    ctx.expect_notification(|n| matches!(n, SessionNotification::MessageDiscarded(_))).await;

    assert_eq!(*ctx.controller.overlay_geometry(), *before);
    assert!(!ctx.controller.roster().get(1).unwrap().presence.recognized);
    assert_eq!(ctx.controller.metrics().protocol_errors, 3);
    assert_eq!(ctx.controller.channel_state(), ChannelState::Open);

    // The dispatcher keeps applying messages after the rejected ones.
    peer.push_json(three_faces(&[3]));
    ctx.expect_notification(|n| matches!(n, SessionNotification::ParticipantRecognized { .. }))
        .await;
    assert!(ctx.controller.roster().get(3).unwrap().presence.recognized);

    ctx.controller.stop().await.expect("Failed to stop session");
}

#[test_log::test(tokio::test)]
async fn test_backend_error_and_more_recognized_than_faces_are_reported() {
    let peer = RecognitionPeer::spawn().await;
    let mut ctx = TestContext::new(&peer.ws_base);
    ctx.controller.start(7).await.expect("Failed to start session");

    peer.push_json(json!({ "error": "Bout has already ended" }));
    let error = ctx.expect_notification(|n| matches!(n, SessionNotification::BackendError(_))).await;
    assert_eq!(error, SessionNotification::BackendError("Bout has already ended".into()));
    assert_eq!(ctx.controller.roster().present_count(), 0);

    peer.push_json(json!({ "recognized": [1, 3], "total_faces": 1 }));
    let inconsistent = ctx
        .expect_notification(|n| matches!(n, SessionNotification::InconsistentFaceCount(_)))
        .await;
    assert_eq!(
        inconsistent,
        SessionNotification::InconsistentFaceCount(FaceCounts { total: 1, recognized: 2, unrecognized: -1 })
    );
    assert_eq!(ctx.controller.roster().present_count(), 2);

    ctx.controller.stop().await.expect("Failed to stop session");
}

#[test_log::test(tokio::test)]
async fn test_remote_close_is_reported_and_session_still_ends_once() {
    let peer = RecognitionPeer::spawn().await;
    let mut ctx = TestContext::new(&peer.ws_base);
    ctx.controller.start(7).await.expect("Failed to start session");
    ctx.expect_notification(|n| matches!(n, SessionNotification::Connected { .. })).await;

    peer.script
        .send(Message::Close(Some(CloseFrame { code: CloseCode::Away, reason: "restart".into() })))
        .expect("Failed to script close");
    let closed = ctx
        .expect_notification(|n| matches!(n, SessionNotification::ChannelClosed { .. }))
        .await;
    assert_eq!(
        closed,
        SessionNotification::ChannelClosed { code: Some(1001), reason: "restart".into() }
    );
    assert_eq!(ctx.controller.channel_state(), ChannelState::Closed);
    assert!(ctx.controller.session().is_some());

    // Roster reads stay available; starting again is refused until stop.
    assert!(matches!(ctx.controller.load_roster(7).await, Err(AttendanceError::SessionActive)));

    ctx.controller.stop().await.expect("Failed to stop session");
    assert_eq!(ctx.backend.ended(), vec![SessionId(42)]);
    assert_eq!(ctx.camera.stops(), 1);
}

#[test_log::test(tokio::test)]
async fn test_restart_ends_previous_session_first() {
    let peer = RecognitionPeer::spawn().await;
    let ctx = TestContext::new(&peer.ws_base);

    ctx.controller.start(7).await.expect("Failed to start first session");
    let second = ctx.controller.start(7).await.expect("Failed to start second session");

    assert_eq!(second.session_id, SessionId(43));
    assert_eq!(ctx.backend.ended(), vec![SessionId(42)]);
    assert_eq!(ctx.camera.opens(), 2);
    assert_eq!(ctx.camera.stops(), 1);
    assert!(eventually(|| peer.log.paths.lock().len() == 2).await);

    ctx.controller.stop().await.expect("Failed to stop session");
    assert_eq!(ctx.backend.ended(), vec![SessionId(42), SessionId(43)]);
}
