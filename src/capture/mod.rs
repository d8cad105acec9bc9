// src/capture/mod.rs
mod camera;
mod encoder;
mod error;
mod source;
mod video_file;

pub use camera::ImageSequenceCamera;
pub use encoder::{DropReason, FrameEncoder, FrameSink, SendOutcome};
pub use error::{DeviceError, EncodeError};
pub use source::{
    CameraDevice, CameraStream, CaptureConstraints, FacingMode, FrameSize, FrameSource, VideoFrame,
};
pub use video_file::VideoFile;
