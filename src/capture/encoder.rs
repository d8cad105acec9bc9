// src/capture/encoder.rs
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use super::error::EncodeError;
use super::source::{FrameSource, VideoFrame};
use crate::utils::metrics::SessionMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Channel is not in the `Open` state.
    NotOpen,
    /// The previous frame is still being transmitted.
    Busy,
    /// The transport refused the frame.
    Transport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    Dropped(DropReason),
}

/// Outbound side of the session channel as seen by the encoder.
#[cfg_attr(test, mockall::automock)]
pub trait FrameSink: Send + Sync {
    /// True when a new frame would be accepted right now.
    fn is_ready(&self) -> bool;

    /// Never fails loudly; a dropped frame is simply retried next tick.
    fn send_frame(&self, frame: Vec<u8>) -> SendOutcome;
}

/// Rasterizes frames into JPEG at native resolution.
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    quality: u8,
}

impl FrameEncoder {
    /// `quality` is on the 0-1 scale used by canvas `toBlob`.
    pub fn new(quality: f32) -> Self {
        let scaled = (quality.clamp(0.01, 1.0) * 100.0).round() as u8;
        Self { quality: scaled.max(1) }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn encode(&self, frame: &VideoFrame) -> Result<Vec<u8>, EncodeError> {
        let size = frame.size();
        if size.is_empty() {
            return Err(EncodeError::EmptyFrame);
        }

        let mut buffer = Vec::with_capacity((size.width * size.height / 4) as usize);
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, self.quality);
        encoder.encode(frame.image.as_raw(), size.width, size.height, ColorType::Rgb8)?;
        Ok(buffer)
    }

    async fn encode_detached(&self, frame: VideoFrame) -> Result<Vec<u8>, EncodeError> {
        let encoder = *self;
        tokio::task::spawn_blocking(move || encoder.encode(&frame))
            .await
            .map_err(|e| EncodeError::Task(e.to_string()))?
    }

    /// Spawns the periodic capture task. Each tick checks sink readiness
    /// before encoding, so nothing is ever queued behind a slow send.
    pub fn spawn_pump(
        self,
        source: Arc<FrameSource>,
        sink: Arc<dyn FrameSink>,
        interval: Duration,
        metrics: Arc<SessionMetrics>,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        self.tick(&source, sink.as_ref(), &metrics).await;
                    }
                }
            }
            debug!("Frame pump stopped");
        })
    }

    async fn tick(&self, source: &FrameSource, sink: &dyn FrameSink, metrics: &SessionMetrics) {
        if !sink.is_ready() {
            trace!("Channel not ready, skipping tick");
            return;
        }
        let frame = match source.snapshot() {
            Some(frame) => frame,
            None => {
                trace!("No decodable frame yet, skipping tick");
                return;
            }
        };

        let buffer = match self.encode_detached(frame).await {
            Ok(buffer) => buffer,
            Err(e) => {
                metrics.record_encode_failure();
                debug!(error = %e, "Frame encoding failed, skipping tick");
                return;
            }
        };

        match sink.send_frame(buffer) {
            SendOutcome::Queued => metrics.record_frame_sent(),
            SendOutcome::Dropped(reason) => {
                metrics.record_frame_dropped();
                trace!(?reason, "Frame dropped");
            }
        }
    }
}
