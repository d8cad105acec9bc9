// src/session/controller.rs
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

use crate::capture::{CameraDevice, CaptureConstraints, FrameEncoder, FrameSink, FrameSource, VideoFile};
use crate::core::roster::{RosterReconciler, RosterSnapshot};
use crate::core::types::{BatchOutcome, FaceCounts, FaceGeometry, RosterUpdate, SessionId, SessionInfo};
use crate::network::{
    AttendanceBackend, ChannelEvent, ChannelState, InboundMessage, SessionChannel,
};
use crate::overlay::{OverlayRenderer, OverlayState, SharedSurface, StrokeColor, StrokeStyle, Viewport};
use crate::session::events::SessionNotification;
use crate::utils::config::AppConfig;
use crate::utils::error::{AttendanceError, Result};
use crate::utils::metrics::{MetricsSnapshot, SessionMetrics};

const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

struct ActiveSession {
    info: SessionInfo,
    run_id: Uuid,
    encoder_stop: watch::Sender<bool>,
    encoder_task: JoinHandle<()>,
    overlay_stop: watch::Sender<bool>,
    overlay_task: JoinHandle<()>,
    dispatcher_task: JoinHandle<()>,
}

/// Owns the camera, the session channel and the three concurrent
/// activities (frame pump, inbound dispatch, overlay loop) of one live
/// recognition session.
pub struct AttendanceController {
    config: Arc<AppConfig>,
    backend: Arc<dyn AttendanceBackend>,
    source: Arc<FrameSource>,
    channel: Arc<SessionChannel>,
    roster: Arc<RosterReconciler>,
    roster_class: Mutex<Option<i64>>,
    overlay_state: Arc<OverlayState>,
    renderer: Arc<OverlayRenderer>,
    encoder: FrameEncoder,
    metrics: Arc<SessionMetrics>,
    notifications: broadcast::Sender<SessionNotification>,
    active: tokio::sync::Mutex<Option<ActiveSession>>,
    current: RwLock<Option<SessionInfo>>,
}

impl AttendanceController {
    pub fn new(
        config: AppConfig,
        backend: Arc<dyn AttendanceBackend>,
        camera: Arc<dyn CameraDevice>,
        viewport: Arc<dyn Viewport>,
        surface: SharedSurface,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let style = |raw: &str| -> Result<StrokeStyle> {
            let color = StrokeColor::parse_hex(raw).map_err(|e| AttendanceError::Config(e.to_string()))?;
            Ok(StrokeStyle { color, line_width: config.overlay.line_width })
        };
        let matched = style(&config.overlay.matched_color)?;
        let unmatched = style(&config.overlay.unmatched_color)?;

        let overlay_state = Arc::new(OverlayState::new());
        let renderer = Arc::new(OverlayRenderer::new(
            overlay_state.clone(),
            viewport,
            surface,
            matched,
            unmatched,
        ));
        let channel = Arc::new(SessionChannel::new(
            config.api.ws_base_url.clone(),
            config.get_connect_timeout(),
            config.get_close_timeout(),
        ));
        let (notifications, _) = broadcast::channel(config.channel.notification_capacity);

        Ok(Self {
            encoder: FrameEncoder::new(config.capture.jpeg_quality),
            backend,
            source: Arc::new(FrameSource::new(camera)),
            channel,
            roster: Arc::new(RosterReconciler::new(Vec::new())),
            roster_class: Mutex::new(None),
            overlay_state,
            renderer,
            metrics: Arc::new(SessionMetrics::new()),
            notifications,
            active: tokio::sync::Mutex::new(None),
            current: RwLock::new(None),
            config,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotification> {
        self.notifications.subscribe()
    }

    pub fn subscribe_channel_state(&self) -> watch::Receiver<ChannelState> {
        self.channel.subscribe_state()
    }

    pub fn roster(&self) -> Arc<RosterSnapshot> {
        self.roster.snapshot()
    }

    pub fn face_counts(&self) -> FaceCounts {
        self.roster.snapshot().face_counts
    }

    pub fn overlay_geometry(&self) -> Arc<FaceGeometry> {
        self.overlay_state.latest()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn session(&self) -> Option<SessionInfo> {
        self.current.read().clone()
    }

    pub fn is_camera_live(&self) -> bool {
        self.source.is_live()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn portrait_url(&self, participant: &crate::core::types::Participant) -> String {
        participant.portrait_url(&self.config.api.base_url)
    }

    /// Fetches the enrolled participants of `class_id`. Not allowed while a
    /// session is running, since the roster size is fixed for a session.
    pub async fn load_roster(&self, class_id: i64) -> Result<Arc<RosterSnapshot>> {
        let active = self.active.lock().await;
        if active.is_some() {
            return Err(AttendanceError::SessionActive);
        }
        self.fetch_roster(class_id).await?;
        Ok(self.roster.snapshot())
    }

    async fn fetch_roster(&self, class_id: i64) -> Result<()> {
        let participants = self.backend.enrolled_participants(class_id).await?;
        self.roster.enroll(participants);
        info!(class_id, participants = self.roster.participant_count(), "Roster loaded");
        *self.roster_class.lock() = Some(class_id);
        Ok(())
    }

    async fn ensure_roster(&self, class_id: i64) -> Result<()> {
        let loaded = *self.roster_class.lock();
        if loaded != Some(class_id) {
            self.fetch_roster(class_id).await?;
        }
        Ok(())
    }

    /// Starts live recognition for `class_id`, stopping any previous session.
    ///
    /// Order: camera, backend session, channel, then the three activities.
    /// Any failure unwinds what was acquired and leaves the controller idle.
    pub async fn start(&self, class_id: i64) -> Result<SessionInfo> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            info!(session_id = %previous.info.session_id, "Stopping previous session before starting a new one");
            if let Err(e) = self.teardown(previous).await {
                warn!(error = %e, "Previous session did not end cleanly");
            }
        }

        self.ensure_roster(class_id).await?;

        let constraints = CaptureConstraints {
            facing_mode: self.config.capture.facing_mode,
            ..CaptureConstraints::default()
        };
        if let Err(e) = self.source.acquire(&constraints).await {
            error!(error = %e, "Could not access the camera");
            return Err(e.into());
        }

        let info = match self.backend.open_session(class_id).await {
            Ok(info) => info,
            Err(e) => {
                error!(class_id, error = %e, "Failed to open session");
                self.source.release();
                return Err(e.into());
            }
        };

        let run_id = Uuid::new_v4();
        let span = info_span!("session", session_id = %info.session_id, %run_id);
        self.roster.reset();
        self.overlay_state.clear();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        if let Err(e) = self.channel.open(info.session_id, events_tx).instrument(span.clone()).await {
            let _ = self.notifications.send(SessionNotification::ConnectionError(e.to_string()));
            self.source.release();
            if let Err(end_error) = self.end_remote(info.session_id).await {
                warn!(error = %end_error, "Failed to end session after connect failure");
            }
            return Err(e.into());
        }

        let dispatcher = Dispatcher {
            session_id: info.session_id,
            roster: self.roster.clone(),
            overlay_state: self.overlay_state.clone(),
            notifications: self.notifications.clone(),
            metrics: self.metrics.clone(),
        };
        let dispatcher_task = tokio::spawn(dispatcher.run(events_rx).instrument(span.clone()));

        let (encoder_stop, encoder_stop_rx) = watch::channel(false);
        let sink: Arc<dyn FrameSink> = self.channel.clone();
        let encoder_task = self.encoder.spawn_pump(
            self.source.clone(),
            sink,
            self.config.get_frame_interval(),
            self.metrics.clone(),
            encoder_stop_rx,
        );

        let (overlay_stop, overlay_stop_rx) = watch::channel(false);
        let overlay_task = self.renderer.clone().spawn(
            self.source.clone(),
            self.config.get_repaint_interval(),
            self.metrics.clone(),
            overlay_stop_rx,
        );

        span.in_scope(|| info!(class_id, "Live recognition started"));
        *self.current.write() = Some(info.clone());
        *active = Some(ActiveSession {
            info: info.clone(),
            run_id,
            encoder_stop,
            encoder_task,
            overlay_stop,
            overlay_task,
            dispatcher_task,
        });

        Ok(info)
    }

    /// Idempotent. Returns the stopped session, or `None` if nothing was running.
    ///
    /// Local resources are always released; an error only reports that the
    /// backend "end session" call failed.
    pub async fn stop(&self) -> Result<Option<SessionInfo>> {
        let mut active = self.active.lock().await;
        match active.take() {
            Some(session) => self.teardown(session).await.map(Some),
            None => Ok(None),
        }
    }

    async fn teardown(&self, session: ActiveSession) -> Result<SessionInfo> {
        let ActiveSession {
            info,
            run_id,
            encoder_stop,
            encoder_task,
            overlay_stop,
            overlay_task,
            dispatcher_task,
        } = session;
        let span = info_span!("session", session_id = %info.session_id, %run_id);

        async {
            // 1. no new frames
            let _ = encoder_stop.send(true);
            join_task(encoder_task, "frame pump").await;

            // 2. channel
            self.channel.close().await;

            // 3. camera
            self.source.release();

            // 4. overlay loop
            let _ = overlay_stop.send(true);
            join_task(overlay_task, "overlay loop").await;

            // The dispatcher drains once the channel reader has gone.
            join_task(dispatcher_task, "dispatcher").await;
            self.metrics.log_summary();
        }
        .instrument(span.clone())
        .await;

        *self.current.write() = None;
        self.end_remote(info.session_id).instrument(span).await?;
        Ok(info)
    }

    async fn end_remote(&self, session_id: SessionId) -> Result<()> {
        self.backend.end_session(session_id).await.map_err(|e| {
            error!(%session_id, error = %e, "Failed to end session");
            AttendanceError::from(e)
        })
    }

    /// Batch variant: one upload, one roster fold, no channel or overlay.
    pub async fn process_upload(&self, class_id: i64, video: &VideoFile) -> Result<BatchOutcome> {
        let active = self.active.lock().await;
        if active.is_some() {
            return Err(AttendanceError::SessionActive);
        }

        self.ensure_roster(class_id).await?;
        let info = self.backend.open_session(class_id).await?;
        self.roster.reset();
        self.overlay_state.clear();
        *self.current.write() = Some(info.clone());

        let result = self.backend.process_video(info.session_id, video).await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(session_id = %info.session_id, error = %e, "Video processing failed");
                *self.current.write() = None;
                if let Err(end_error) = self.end_remote(info.session_id).await {
                    warn!(error = %end_error, "Failed to end session after processing failure");
                }
                return Err(e.into());
            }
        };

        let update = RosterUpdate {
            recognized_ids: outcome.recognized_ids.clone(),
            timestamp: outcome.processed_at,
            total_faces: Some(outcome.recognized_ids.len() as i64),
        };
        let fold = self.roster.fold(&update);
        for participant in fold.newly_recognized {
            let _ = self.notifications.send(SessionNotification::ParticipantRecognized {
                participant,
                at: outcome.processed_at,
            });
        }
        let _ = self.notifications.send(SessionNotification::BatchProcessed {
            session_id: info.session_id,
            total_recognized: outcome.total_recognized,
        });
        info!(session_id = %info.session_id, total_recognized = outcome.total_recognized, "Video processed");

        *self.current.write() = None;
        self.end_remote(info.session_id).await?;
        Ok(outcome)
    }
}

impl Drop for AttendanceController {
    fn drop(&mut self) {
        let Some(session) = self.active.get_mut().take() else {
            return;
        };

        // Same order as teardown, without waiting.
        let _ = session.encoder_stop.send(true);
        session.encoder_task.abort();
        self.channel.abort();
        self.source.release();
        let _ = session.overlay_stop.send(true);
        session.overlay_task.abort();
        session.dispatcher_task.abort();

        let session_id = session.info.session_id;
        warn!(%session_id, "Controller dropped with an active session");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let backend = self.backend.clone();
            handle.spawn(async move {
                if let Err(e) = backend.end_session(session_id).await {
                    error!(%session_id, error = %e, "Failed to end session on drop");
                }
            });
        }
    }
}

async fn join_task(mut handle: JoinHandle<()>, name: &'static str) {
    match tokio::time::timeout(TASK_JOIN_TIMEOUT, &mut handle).await {
        Ok(Ok(())) => debug!(task = name, "Task finished"),
        Ok(Err(e)) if e.is_cancelled() => debug!(task = name, "Task cancelled"),
        Ok(Err(e)) => error!(task = name, error = %e, "Task failed"),
        Err(_) => {
            warn!(task = name, "Task did not stop in time, aborting");
            handle.abort();
        }
    }
}

/// Applies channel events in receipt order. Roster and overlay each see
/// only their own slice of a message.
struct Dispatcher {
    session_id: SessionId,
    roster: Arc<RosterReconciler>,
    overlay_state: Arc<OverlayState>,
    notifications: broadcast::Sender<SessionNotification>,
    metrics: Arc<SessionMetrics>,
}

impl Dispatcher {
    async fn run(self, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
        while let Some(event) = events.recv().await {
            self.apply(event);
        }
        debug!("Dispatcher stopped");
    }

    fn notify(&self, notification: SessionNotification) {
        let _ = self.notifications.send(notification);
    }

    fn apply(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => {
                info!("Facial recognition is now active");
                self.notify(SessionNotification::Connected { session_id: self.session_id });
            }
            ChannelEvent::Message(Ok(InboundMessage::BackendError(message))) => {
                self.metrics.record_message(true);
                warn!(%message, "Recognizer reported an error");
                self.notify(SessionNotification::BackendError(message));
            }
            ChannelEvent::Message(Ok(message)) if message.is_empty() => {
                self.metrics.record_message(true);
                trace!("Ignoring message without roster or geometry");
            }
            ChannelEvent::Message(Ok(InboundMessage::Recognition { roster, geometry })) => {
                self.metrics.record_message(true);

                if let Some(update) = roster {
                    let outcome = self.roster.fold(&update);
                    if !outcome.unknown_ids.is_empty() {
                        debug!(unknown_ids = ?outcome.unknown_ids, "Recognized ids not enrolled in this session");
                    }
                    for participant in outcome.newly_recognized {
                        info!(participant_id = participant.id, name = %participant.display_name, "Participant marked present");
                        self.notify(SessionNotification::ParticipantRecognized {
                            participant,
                            at: update.timestamp,
                        });
                    }
                    let counts = outcome.face_counts;
                    if !counts.is_consistent() {
                        warn!(?counts, "Backend recognized more participants than faces");
                        self.notify(SessionNotification::InconsistentFaceCount(counts));
                    }
                    self.notify(SessionNotification::FaceCountsUpdated(counts));
                }

                if let Some(geometry) = geometry {
                    self.overlay_state.replace(geometry);
                }
            }
            ChannelEvent::Message(Err(e)) => {
                self.metrics.record_message(false);
                warn!(error = %e, "Discarding malformed message");
                self.notify(SessionNotification::MessageDiscarded(e.to_string()));
            }
            ChannelEvent::Closed { code, reason } => {
                info!(?code, %reason, "Session channel closed by peer or stop");
                self.notify(SessionNotification::ChannelClosed { code, reason });
            }
            ChannelEvent::Failed(reason) => {
                error!(%reason, "Session channel failed");
                self.notify(SessionNotification::ConnectionError(reason));
            }
        }
    }
}
