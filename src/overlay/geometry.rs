// src/overlay/geometry.rs
use thiserror::Error;

use crate::capture::FrameSize;
use crate::core::types::FaceGeometry;

#[derive(Debug, Error, PartialEq)]
pub enum ColorParseError {
    #[error("expected #RRGGBB or #RRGGBBAA, got {0:?}")]
    Format(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrokeColor(pub [u8; 4]);

impl StrokeColor {
    pub fn parse_hex(raw: &str) -> Result<Self, ColorParseError> {
        let invalid = || ColorParseError::Format(raw.to_string());
        let hex = raw.strip_prefix('#').ok_or_else(invalid)?;
        if !(hex.len() == 6 || hex.len() == 8) || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
        let alpha = if hex.len() == 8 { channel(6)? } else { 255 };
        Ok(Self([channel(0)?, channel(2)?, channel(4)?, alpha]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeStyle {
    pub color: StrokeColor,
    pub line_width: u32,
}

/// On-screen (layout) size of the video element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplaySize {
    pub width: f64,
    pub height: f64,
}

impl DisplaySize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub matched: bool,
}

/// Boxes in display space for one repaint. Never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayGeometry {
    pub display: DisplaySize,
    pub scale_x: f64,
    pub scale_y: f64,
    pub boxes: Vec<OverlayBox>,
}

/// Maps native-pixel face boxes onto the displayed video.
///
/// Without a known native resolution (no decodable frame yet) or with a
/// collapsed display, nothing can be placed and the box list is empty.
pub fn compute_geometry(faces: &FaceGeometry, native: Option<FrameSize>, display: DisplaySize) -> OverlayGeometry {
    let native = match native {
        Some(native) if !native.is_empty() && !display.is_empty() => native,
        _ => {
            return OverlayGeometry {
                display,
                scale_x: 0.0,
                scale_y: 0.0,
                boxes: Vec::new(),
            }
        }
    };

    let scale_x = display.width / f64::from(native.width);
    let scale_y = display.height / f64::from(native.height);

    let boxes = faces
        .faces()
        .map(|(face, matched)| OverlayBox {
            x: face.left * scale_x,
            y: face.top * scale_y,
            width: (face.right - face.left) * scale_x,
            height: (face.bottom - face.top) * scale_y,
            matched,
        })
        .collect();

    OverlayGeometry {
        display,
        scale_x,
        scale_y,
        boxes,
    }
}
