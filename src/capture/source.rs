// src/capture/source.rs
use async_trait::async_trait;
use image::RgbImage;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

use super::error::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    Environment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub facing_mode: FacingMode,
    pub ideal_width: Option<u32>,
    pub ideal_height: Option<u32>,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            facing_mode: FacingMode::User,
            ideal_width: None,
            ideal_height: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// One decoded camera frame in native resolution.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: Arc<RgbImage>,
    pub captured_at: Instant,
}

impl VideoFrame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
            captured_at: Instant::now(),
        }
    }

    pub fn size(&self) -> FrameSize {
        FrameSize {
            width: self.image.width(),
            height: self.image.height(),
        }
    }
}

/// A live stream handed out by a `CameraDevice`.
pub trait CameraStream: Send + Sync {
    /// Latest decodable frame, `None` until the device produced one.
    fn latest(&self) -> Option<VideoFrame>;

    /// Stops every underlying track. Called at most once by `FrameSource`.
    fn stop(&mut self);
}

/// Hardware seam standing in for `getUserMedia`.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    fn label(&self) -> String;
    async fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn CameraStream>, DeviceError>;
}

/// Owns at most one acquired camera stream.
pub struct FrameSource {
    device: Arc<dyn CameraDevice>,
    stream: Mutex<Option<Box<dyn CameraStream>>>,
}

impl FrameSource {
    pub fn new(device: Arc<dyn CameraDevice>) -> Self {
        Self {
            device,
            stream: Mutex::new(None),
        }
    }

    pub async fn acquire(&self, constraints: &CaptureConstraints) -> Result<(), DeviceError> {
        if self.is_live() {
            debug!("Camera already acquired");
            return Ok(());
        }

        let stream = self.device.open(constraints).await?;

        let mut slot = self.stream.lock();
        if slot.is_some() {
            // Lost a race with a concurrent acquire; keep the first stream.
            let mut duplicate = stream;
            duplicate.stop();
            return Ok(());
        }
        *slot = Some(stream);
        info!(device = %self.device.label(), facing = ?constraints.facing_mode, "Camera acquired");
        Ok(())
    }

    /// Idempotent. Returns whether a stream was actually stopped.
    pub fn release(&self) -> bool {
        let stream = self.stream.lock().take();
        match stream {
            Some(mut stream) => {
                stream.stop();
                info!(device = %self.device.label(), "Camera released");
                true
            }
            None => false,
        }
    }

    pub fn is_live(&self) -> bool {
        self.stream.lock().is_some()
    }

    pub fn snapshot(&self) -> Option<VideoFrame> {
        self.stream.lock().as_ref().and_then(|stream| stream.latest())
    }

    /// Negotiated resolution; unknown until the first decodable frame.
    pub fn native_size(&self) -> Option<FrameSize> {
        self.snapshot().map(|frame| frame.size()).filter(|size| !size.is_empty())
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.release();
    }
}
