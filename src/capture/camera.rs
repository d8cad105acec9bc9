// src/capture/camera.rs
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::error::DeviceError;
use super::source::{CameraDevice, CameraStream, CaptureConstraints, VideoFrame};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Camera backed by a directory of still images, replayed in name order
/// at a fixed frame rate and looped forever.
pub struct ImageSequenceCamera {
    directory: PathBuf,
    frame_interval: Duration,
}

impl ImageSequenceCamera {
    pub fn new(directory: impl Into<PathBuf>, fps: u32) -> Self {
        Self {
            directory: directory.into(),
            frame_interval: Duration::from_secs_f64(1.0 / f64::from(fps.max(1))),
        }
    }

    async fn list_frames(&self) -> Result<Vec<PathBuf>, DeviceError> {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DeviceError::NotFound(self.directory.display().to_string()));
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(DeviceError::PermissionDenied);
            }
            Err(e) => return Err(DeviceError::Unavailable(e.to_string())),
        };

        let mut frames = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DeviceError::Unavailable(e.to_string()))?
        {
            let path = entry.path();
            if is_image(&path) {
                frames.push(path);
            }
        }
        frames.sort();

        if frames.is_empty() {
            return Err(DeviceError::NotFound(format!(
                "no images in {}",
                self.directory.display()
            )));
        }
        Ok(frames)
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[async_trait]
impl CameraDevice for ImageSequenceCamera {
    fn label(&self) -> String {
        format!("image-sequence:{}", self.directory.display())
    }

    async fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn CameraStream>, DeviceError> {
        let frames = self.list_frames().await?;
        debug!(
            frames = frames.len(),
            facing = ?constraints.facing_mode,
            "Opening image sequence camera"
        );

        let (tx, rx) = watch::channel(None);
        let interval = self.frame_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            for path in frames.iter().cycle() {
                ticker.tick().await;
                let decoded = {
                    let path = path.clone();
                    tokio::task::spawn_blocking(move || image::open(&path).map(|img| img.to_rgb8())).await
                };
                match decoded {
                    Ok(Ok(image)) => {
                        if tx.send(Some(VideoFrame::new(image))).is_err() {
                            break;
                        }
                    }
                    // Undecodable frames are skipped; the previous frame stays current.
                    Ok(Err(e)) => warn!(path = %path.display(), error = %e, "Skipping undecodable frame"),
                    Err(e) => warn!(error = %e, "Frame decode task failed"),
                }
            }
        });

        Ok(Box::new(ImageSequenceStream {
            frames: rx,
            task: Some(task),
        }))
    }
}

struct ImageSequenceStream {
    frames: watch::Receiver<Option<VideoFrame>>,
    task: Option<JoinHandle<()>>,
}

impl CameraStream for ImageSequenceStream {
    fn latest(&self) -> Option<VideoFrame> {
        self.frames.borrow().clone()
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ImageSequenceStream {
    fn drop(&mut self) {
        self.stop();
    }
}
