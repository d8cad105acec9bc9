// src/main.rs
use anyhow::{bail, Context};
use live_attendance::{
    overlay::SharedSurface, utils::logging::init_tracing, AppConfig, AttendanceController, FixedViewport,
    HttpBackend, ImageSequenceCamera, ImageSurface, SessionNotification, VideoFile,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

enum Mode {
    Live { frames_dir: String },
    Upload { video: String },
}

fn parse_args() -> anyhow::Result<(i64, Mode)> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let usage = "usage: live-attendance <class-id> [frames-dir] | <class-id> --upload <video>";

    let class_id = args
        .first()
        .context(usage)?
        .parse::<i64>()
        .with_context(|| format!("invalid class id\n{}", usage))?;

    let mode = match args.get(1).map(String::as_str) {
        Some("--upload") => match args.get(2) {
            Some(video) => Mode::Upload { video: video.clone() },
            None => bail!("missing video path\n{}", usage),
        },
        Some(dir) => Mode::Live { frames_dir: dir.to_string() },
        None => Mode::Live { frames_dir: "frames".to_string() },
    };

    Ok((class_id, mode))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Load configuration
    let config = AppConfig::new().context("Failed to load configuration")?;
    let _log_guard = init_tracing(&config.logging);

    info!("Starting live attendance v{}", env!("CARGO_PKG_VERSION"));

    let (class_id, mode) = parse_args()?;

    let backend = Arc::new(HttpBackend::new(&config.api.base_url, config.get_request_timeout())?);
    let frames_dir = match &mode {
        Mode::Live { frames_dir } => frames_dir.clone(),
        Mode::Upload { .. } => String::new(),
    };
    let camera = Arc::new(ImageSequenceCamera::new(frames_dir, config.capture.camera_fps));
    let viewport = Arc::new(FixedViewport::new(640.0, 480.0));
    let surface: SharedSurface = Arc::new(Mutex::new(ImageSurface::new()));

    let controller = AttendanceController::new(config, backend, camera, viewport, surface)?;
    let notifications = tokio::spawn(log_notifications(controller.subscribe()));

    let roster = controller.load_roster(class_id).await.map_err(|e| {
        error!("Failed to load roster: {}", e);
        e
    })?;
    info!(class_id, participants = roster.entries.len(), "Class roster ready");

    match mode {
        Mode::Upload { video } => {
            let video = VideoFile::open(&video).await?;
            let outcome = controller.process_upload(class_id, &video).await?;
            info!(
                total_recognized = outcome.total_recognized,
                present = controller.roster().present_count(),
                "Upload processed"
            );
        }
        Mode::Live { .. } => {
            let session = controller.start(class_id).await.map_err(|e| {
                error!("Failed to start session: {}", e);
                e
            })?;
            info!(session_id = %session.session_id, "Session running, press Ctrl-C to stop");

            // Handle shutdown signals
            let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
            tokio::spawn(async move {
                match signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Received shutdown signal");
                        let _ = shutdown_tx.send(());
                    }
                    Err(err) => {
                        error!("Failed to listen for shutdown signal: {}", err);
                    }
                }
            });
            let _ = shutdown_rx.await;

            if let Err(e) = controller.stop().await {
                error!("Error during shutdown: {}", e);
            }

            let snapshot = controller.roster();
            for entry in &snapshot.entries {
                let mark = if entry.presence.recognized { "present" } else { "absent" };
                info!(participant = %entry.participant.display_name, status = mark, "Attendance");
            }
        }
    }

    drop(controller);
    let _ = notifications.await;
    info!("Shutdown complete");
    Ok(())
}

async fn log_notifications(mut notifications: broadcast::Receiver<SessionNotification>) {
    loop {
        match notifications.recv().await {
            Ok(SessionNotification::ParticipantRecognized { participant, at }) => {
                info!("{} marked present at {}", participant.display_name, at.format("%H:%M:%S"));
            }
            Ok(SessionNotification::FaceCountsUpdated(counts)) => {
                info!(
                    total = counts.total,
                    recognized = counts.recognized,
                    unrecognized = counts.unrecognized,
                    "Faces"
                );
            }
            Ok(SessionNotification::BackendError(message)) | Ok(SessionNotification::ConnectionError(message)) => {
                error!("{}", message);
            }
            Ok(other) => info!(?other, "Session notification"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Notification log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
