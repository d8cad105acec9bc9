// src/overlay/surface.rs
use image::{Rgba, RgbaImage};
use parking_lot::RwLock;
use std::path::Path;

use super::geometry::{DisplaySize, OverlayBox, StrokeStyle};

/// Reports the current layout size of the displayed video.
pub trait Viewport: Send + Sync {
    fn display_size(&self) -> DisplaySize;
}

/// A transparent layer stacked over the video.
pub trait OverlaySurface: Send {
    fn resize(&mut self, width: u32, height: u32);
    fn clear(&mut self);
    fn stroke_rect(&mut self, rect: &OverlayBox, style: &StrokeStyle);
    fn present(&mut self) {}
}

/// Viewport whose size is pushed by whoever owns the layout.
#[derive(Debug)]
pub struct FixedViewport {
    size: RwLock<DisplaySize>,
}

impl FixedViewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { size: RwLock::new(DisplaySize::new(width, height)) }
    }

    pub fn set_size(&self, width: f64, height: f64) {
        *self.size.write() = DisplaySize::new(width, height);
    }
}

impl Viewport for FixedViewport {
    fn display_size(&self) -> DisplaySize {
        *self.size.read()
    }
}

/// Software surface backed by an RGBA buffer.
#[derive(Debug, Clone)]
pub struct ImageSurface {
    canvas: RgbaImage,
}

impl ImageSurface {
    pub fn new() -> Self {
        Self { canvas: RgbaImage::new(0, 0) }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.canvas
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> image::ImageResult<()> {
        self.canvas.save(path)
    }

    fn fill(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgba<u8>) {
        let (w, h) = (i64::from(self.canvas.width()), i64::from(self.canvas.height()));
        let (x0, x1) = (x0.clamp(0, w), x1.clamp(0, w));
        let (y0, y1) = (y0.clamp(0, h), y1.clamp(0, h));
        for y in y0..y1 {
            for x in x0..x1 {
                self.canvas.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

impl Default for ImageSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlaySurface for ImageSurface {
    fn resize(&mut self, width: u32, height: u32) {
        if self.canvas.dimensions() != (width, height) {
            self.canvas = RgbaImage::new(width, height);
        }
    }

    fn clear(&mut self) {
        for pixel in self.canvas.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    fn stroke_rect(&mut self, rect: &OverlayBox, style: &StrokeStyle) {
        let color = Rgba(style.color.0);
        let line = i64::from(style.line_width.max(1));
        // Edges past the canvas are pinned just outside it before the cast.
        let (w, h) = (f64::from(self.canvas.width()), f64::from(self.canvas.height()));
        let reach = line as f64;
        let pin_x = |v: f64| v.round().clamp(-reach, w + reach) as i64;
        let pin_y = |v: f64| v.round().clamp(-reach, h + reach) as i64;
        let x0 = pin_x(rect.x);
        let y0 = pin_y(rect.y);
        let x1 = pin_x(rect.x + rect.width);
        let y1 = pin_y(rect.y + rect.height);

        self.fill(x0, y0, x1 + line, y0 + line, color);
        self.fill(x0, y1, x1 + line, y1 + line, color);
        self.fill(x0, y0, x0 + line, y1 + line, color);
        self.fill(x1, y0, x1 + line, y1 + line, color);
    }
}
