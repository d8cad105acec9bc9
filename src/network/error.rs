// src/network/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Channel already in use (state {0})")]
    AlreadyOpen(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("face_locations has {boxes} entries but recognition_status has {flags}")]
    LengthMismatch { boxes: usize, flags: usize },

    #[error("Missing field {0}")]
    MissingField(&'static str),

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}
