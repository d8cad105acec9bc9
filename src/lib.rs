// src/lib.rs
//! Client-side controller for live face-recognition attendance sessions.
//!
//! A session couples a camera, a WebSocket to the recognition backend and a
//! box overlay. [`AttendanceController`] owns all three and keeps the roster
//! of present participants.

pub mod capture;
pub mod core;
pub mod network;
pub mod overlay;
pub mod session;
pub mod utils;

pub use crate::capture::{CameraDevice, FrameSource, ImageSequenceCamera, VideoFile};
pub use crate::core::{RosterReconciler, RosterSnapshot};
pub use crate::network::{AttendanceBackend, HttpBackend, SessionChannel};
pub use crate::overlay::{FixedViewport, ImageSurface, OverlayRenderer};
pub use crate::session::{AttendanceController, SessionNotification};
pub use crate::utils::config::AppConfig;
pub use crate::utils::error::{AttendanceError, Result};
