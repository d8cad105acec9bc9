// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use image::RgbImage;
use live_attendance::{
    capture::{CameraDevice, CameraStream, CaptureConstraints, DeviceError, VideoFile, VideoFrame},
    core::{BatchOutcome, Participant, SessionId, SessionInfo},
    network::{ApiError, AttendanceBackend},
    overlay::{FixedViewport, OverlayBox, OverlaySurface, SharedSurface, StrokeColor, StrokeStyle},
    AppConfig, AttendanceController, SessionNotification,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn participants() -> Vec<Participant> {
    vec![
        Participant { id: 1, display_name: "Ada".into(), portrait_ref: "students/ada.jpg".into() },
        Participant { id: 2, display_name: "Brook".into(), portrait_ref: "students/brook.jpg".into() },
        Participant { id: 3, display_name: "Cyd".into(), portrait_ref: "students/cyd.jpg".into() },
    ]
}

/// In-memory backend that records every call.
pub struct FakeBackend {
    pub participants: Vec<Participant>,
    pub next_session: AtomicI64,
    pub fail_open: bool,
    pub recognized_in_video: Vec<i64>,
    pub open_calls: AtomicUsize,
    pub ended: Mutex<Vec<SessionId>>,
    pub uploads: Mutex<Vec<(SessionId, String)>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            participants: participants(),
            next_session: AtomicI64::new(41),
            fail_open: false,
            recognized_in_video: vec![1, 3],
            open_calls: AtomicUsize::new(0),
            ended: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_open() -> Self {
        Self { fail_open: true, ..Self::new() }
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn ended(&self) -> Vec<SessionId> {
        self.ended.lock().clone()
    }
}

#[async_trait]
impl AttendanceBackend for FakeBackend {
    async fn enrolled_participants(&self, _class_id: i64) -> Result<Vec<Participant>, ApiError> {
        Ok(self.participants.clone())
    }

    async fn open_session(&self, class_id: i64) -> Result<SessionInfo, ApiError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(ApiError::Status { status: 500, body: "boom".into() });
        }
        let id = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionInfo {
            session_id: SessionId(id),
            class_id,
            started_at: Utc::now(),
        })
    }

    async fn end_session(&self, session_id: SessionId) -> Result<(), ApiError> {
        self.ended.lock().push(session_id);
        Ok(())
    }

    async fn process_video(&self, session_id: SessionId, video: &VideoFile) -> Result<BatchOutcome, ApiError> {
        self.uploads.lock().push((session_id, video.file_name().to_string()));
        let recognized_ids: BTreeSet<i64> = self.recognized_in_video.iter().copied().collect();
        Ok(BatchOutcome {
            total_recognized: recognized_ids.len(),
            recognized_ids,
            processed_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        })
    }
}

/// Camera producing a constant 64x48 frame.
pub struct FakeCamera {
    pub deny: Option<DeviceError>,
    pub opens: AtomicUsize,
    pub stops: Arc<AtomicUsize>,
}

impl FakeCamera {
    pub fn new() -> Self {
        Self { deny: None, opens: AtomicUsize::new(0), stops: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn denied() -> Self {
        Self { deny: Some(DeviceError::PermissionDenied), ..Self::new() }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

struct FakeStream {
    stops: Arc<AtomicUsize>,
}

impl CameraStream for FakeStream {
    fn latest(&self) -> Option<VideoFrame> {
        Some(VideoFrame::new(RgbImage::from_pixel(64, 48, image::Rgb([90, 120, 150]))))
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CameraDevice for FakeCamera {
    fn label(&self) -> String {
        "fake camera".into()
    }

    async fn open(&self, _constraints: &CaptureConstraints) -> Result<Box<dyn CameraStream>, DeviceError> {
        if let Some(error) = &self.deny {
            return Err(error.clone());
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream { stops: self.stops.clone() }))
    }
}

/// Surface that remembers the strokes of the last repaint.
#[derive(Default)]
pub struct RecordingSurface {
    pub strokes: Vec<(OverlayBox, StrokeColor)>,
    pub presents: usize,
}

impl OverlaySurface for RecordingSurface {
    fn resize(&mut self, _width: u32, _height: u32) {}

    fn clear(&mut self) {
        self.strokes.clear();
    }

    fn stroke_rect(&mut self, rect: &OverlayBox, style: &StrokeStyle) {
        self.strokes.push((*rect, style.color));
    }

    fn present(&mut self) {
        self.presents += 1;
    }
}

/// What the local WebSocket peer observed.
#[derive(Default)]
pub struct PeerLog {
    pub paths: Mutex<Vec<String>>,
    pub frames: AtomicUsize,
    pub close_codes: Mutex<Vec<Option<u16>>>,
}

impl PeerLog {
    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }
}

/// Local stand-in for the recognition socket. Messages pushed into
/// `script` are sent to the connected client.
pub struct RecognitionPeer {
    pub ws_base: String,
    pub log: Arc<PeerLog>,
    pub script: mpsc::UnboundedSender<Message>,
}

impl RecognitionPeer {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind peer");
        let addr = listener.local_addr().expect("Failed to read peer address");
        let log = Arc::new(PeerLog::default());
        let (script, mut outgoing) = mpsc::unbounded_channel::<Message>();

        let peer_log = log.clone();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let paths = peer_log.clone();
                let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                    paths.paths.lock().push(request.uri().path().to_string());
                    Ok(response)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(tcp, callback).await else {
                    continue;
                };

                loop {
                    tokio::select! {
                        incoming = ws.next() => match incoming {
                            Some(Ok(Message::Binary(_))) => {
                                peer_log.frames.fetch_add(1, Ordering::SeqCst);
                            }
                            Some(Ok(Message::Close(frame))) => {
                                peer_log.close_codes.lock().push(frame.map(|f| u16::from(f.code)));
                            }
                            Some(Ok(_)) => {}
                            Some(Err(_)) | None => break,
                        },
                        Some(message) = outgoing.recv() => {
                            if ws.send(message).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });

        Self {
            ws_base: format!("ws://{}", addr),
            log,
            script,
        }
    }

    pub fn push_json(&self, value: serde_json::Value) {
        self.script
            .send(Message::Text(value.to_string()))
            .expect("Failed to script peer message");
    }
}

pub struct TestContext {
    pub controller: AttendanceController,
    pub backend: Arc<FakeBackend>,
    pub camera: Arc<FakeCamera>,
    pub surface: Arc<Mutex<RecordingSurface>>,
    pub notifications: broadcast::Receiver<SessionNotification>,
}

impl TestContext {
    pub fn new(ws_base: &str) -> Self {
        Self::with(ws_base, FakeBackend::new(), FakeCamera::new())
    }

    pub fn with(ws_base: &str, backend: FakeBackend, camera: FakeCamera) -> Self {
        let mut config = AppConfig::defaults().expect("Failed to load default config");
        config.api.ws_base_url = ws_base.to_string();
        config.capture.frame_interval_ms = 40;
        config.channel.connect_timeout_secs = 2;
        config.channel.close_timeout_ms = 500;
        config.overlay.refresh_hz = 50;

        let backend = Arc::new(backend);
        let camera = Arc::new(camera);
        let surface = Arc::new(Mutex::new(RecordingSurface::default()));
        let shared: SharedSurface = surface.clone();

        let controller = AttendanceController::new(
            config,
            backend.clone(),
            camera.clone(),
            Arc::new(FixedViewport::new(128.0, 96.0)),
            shared,
        )
        .expect("Failed to build controller");
        let notifications = controller.subscribe();

        Self { controller, backend, camera, surface, notifications }
    }

    /// Waits for the first notification matching `pred`, skipping others.
    pub async fn expect_notification<F>(&mut self, pred: F) -> SessionNotification
    where
        F: Fn(&SessionNotification) -> bool,
    {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, self.notifications.recv()).await {
                Ok(Ok(notification)) if pred(&notification) => return notification,
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(e)) => panic!("notification stream ended: {}", e),
                Err(_) => panic!("timed out waiting for notification"),
            }
        }
    }

    pub fn drain_notifications(&mut self) -> Vec<SessionNotification> {
        let mut out = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            out.push(notification);
        }
        out
    }
}

/// Polls `condition` until it holds or the wait budget runs out.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

pub fn closed_port_base() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    let port = listener.local_addr().expect("Failed to read address").port();
    drop(listener);
    format!("ws://127.0.0.1:{}", port)
}
