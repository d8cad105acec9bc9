// tests/integration/batch_upload.rs
use live_attendance::capture::VideoFile;
use live_attendance::core::SessionId;
use live_attendance::{AttendanceError, SessionNotification};
use std::io::Write;

use crate::common::{closed_port_base, RecognitionPeer, TestContext};

async fn sample_video(dir: &tempfile::TempDir) -> VideoFile {
    let path = dir.path().join("lecture.mp4");
    let mut file = std::fs::File::create(&path).expect("Failed to create video");
    file.write_all(&[0u8; 2048]).expect("Failed to write video");
    VideoFile::open(&path).await.expect("Failed to open video")
}

#[test_log::test(tokio::test)]
async fn test_upload_marks_recognized_and_ends_session() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let video = sample_video(&dir).await;
    let mut ctx = TestContext::new(&closed_port_base());

    let outcome = ctx.controller.process_upload(7, &video).await.expect("Upload failed");

    assert_eq!(outcome.total_recognized, 2);
    let roster = ctx.controller.roster();
    assert_eq!(roster.present_count(), 2);
    assert!(roster.get(1).unwrap().presence.recognized);
    assert!(!roster.get(2).unwrap().presence.recognized);
    assert_eq!(roster.get(3).unwrap().presence.first_recognized_at, Some(outcome.processed_at));

    assert_eq!(*ctx.backend.uploads.lock(), vec![(SessionId(42), "lecture.mp4".to_string())]);
    assert_eq!(ctx.backend.ended(), vec![SessionId(42)]);
    assert_eq!(ctx.camera.opens(), 0);
    assert!(ctx.controller.session().is_none());

    let notifications = ctx.drain_notifications();
    let recognized = notifications
        .iter()
        .filter(|n| matches!(n, SessionNotification::ParticipantRecognized { .. }))
        .count();
    assert_eq!(recognized, 2);
    assert!(notifications.contains(&SessionNotification::BatchProcessed {
        session_id: SessionId(42),
        total_recognized: 2,
    }));
}

#[test_log::test(tokio::test)]
async fn test_upload_refused_during_live_session() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let video = sample_video(&dir).await;
    let peer = RecognitionPeer::spawn().await;
    let ctx = TestContext::new(&peer.ws_base);
    ctx.controller.start(7).await.expect("Failed to start session");

    let result = ctx.controller.process_upload(7, &video).await;

    assert!(matches!(result, Err(AttendanceError::SessionActive)));
    assert!(ctx.backend.uploads.lock().is_empty());
    ctx.controller.stop().await.expect("Failed to stop session");
}
