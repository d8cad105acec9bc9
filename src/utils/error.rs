// src/utils/error.rs
use thiserror::Error;

use crate::capture::DeviceError;
use crate::network::{ApiError, ConnectError};

#[derive(Debug, Error)]
pub enum AttendanceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Camera error: {0}")]
    Device(#[from] DeviceError),

    #[error("Channel error: {0}")]
    Connect(#[from] ConnectError),

    #[error("Backend API error: {0}")]
    Api(#[from] ApiError),

    #[error("A recognition session is already active")]
    SessionActive,
}

pub type Result<T> = std::result::Result<T, AttendanceError>;
