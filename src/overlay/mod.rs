// src/overlay/mod.rs
mod geometry;
mod renderer;
mod surface;

pub use geometry::{
    compute_geometry, ColorParseError, DisplaySize, OverlayBox, OverlayGeometry, StrokeColor, StrokeStyle,
};
pub use renderer::{OverlayRenderer, OverlayState, SharedSurface};
pub use surface::{FixedViewport, ImageSurface, OverlaySurface, Viewport};
