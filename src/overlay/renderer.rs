// src/overlay/renderer.rs
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use super::geometry::{compute_geometry, OverlayGeometry, StrokeStyle};
use super::surface::{OverlaySurface, Viewport};
use crate::capture::{FrameSize, FrameSource};
use crate::core::types::FaceGeometry;
use crate::utils::metrics::SessionMetrics;

pub type SharedSurface = Arc<Mutex<dyn OverlaySurface>>;

/// Last-known face geometry, swapped atomically per inbound message.
#[derive(Debug, Default)]
pub struct OverlayState {
    latest: RwLock<Arc<FaceGeometry>>,
}

impl OverlayState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, geometry: FaceGeometry) {
        *self.latest.write() = Arc::new(geometry);
    }

    pub fn latest(&self) -> Arc<FaceGeometry> {
        self.latest.read().clone()
    }

    pub fn clear(&self) {
        self.replace(FaceGeometry::empty());
    }
}

pub struct OverlayRenderer {
    state: Arc<OverlayState>,
    viewport: Arc<dyn Viewport>,
    surface: SharedSurface,
    matched: StrokeStyle,
    unmatched: StrokeStyle,
}

impl OverlayRenderer {
    pub fn new(
        state: Arc<OverlayState>,
        viewport: Arc<dyn Viewport>,
        surface: SharedSurface,
        matched: StrokeStyle,
        unmatched: StrokeStyle,
    ) -> Self {
        Self {
            state,
            viewport,
            surface,
            matched,
            unmatched,
        }
    }

    /// One full repaint: track layout size, clear, draw every known box.
    pub fn repaint(&self, native: Option<FrameSize>) -> OverlayGeometry {
        let faces = self.state.latest();
        let display = self.viewport.display_size();
        let geometry = compute_geometry(&faces, native, display);

        let mut surface = self.surface.lock();
        surface.resize(
            display.width.max(0.0).round() as u32,
            display.height.max(0.0).round() as u32,
        );
        surface.clear();
        for overlay_box in &geometry.boxes {
            let style = if overlay_box.matched { &self.matched } else { &self.unmatched };
            surface.stroke_rect(overlay_box, style);
        }
        surface.present();

        geometry
    }

    /// Repaints at `interval` until `stop` flips; clears the surface on exit.
    pub fn spawn(
        self: Arc<Self>,
        source: Arc<FrameSource>,
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
                        let geometry = self.repaint(source.native_size());
                        metrics.record_repaint();
                        trace!(boxes = geometry.boxes.len(), "Overlay repainted");
                    }
                }
            }

            let mut surface = self.surface.lock();
            surface.clear();
            surface.present();
            debug!("Overlay loop stopped");
        })
    }
}
