// src/capture/error.rs
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Camera permission denied")]
    PermissionDenied,

    #[error("No matching capture device: {0}")]
    NotFound(String),

    #[error("Capture device unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Frame has no pixels")]
    EmptyFrame,

    #[error("JPEG encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Encoder task failed: {0}")]
    Task(String),
}
