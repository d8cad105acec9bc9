// src/utils/config.rs
use serde::Deserialize;
use std::time::Duration;
use config::{Config as ConfigLib, ConfigError, Environment, File};

use crate::capture::FacingMode;
use crate::overlay::StrokeColor;
use crate::utils::error::{AttendanceError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub capture: CaptureConfig,
    pub channel: ChannelConfig,
    pub overlay: OverlayConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub ws_base_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    pub frame_interval_ms: u64,
    pub jpeg_quality: f32,
    pub facing_mode: FacingMode,
    pub camera_fps: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub connect_timeout_secs: u64,
    pub close_timeout_ms: u64,
    pub notification_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverlayConfig {
    pub refresh_hz: u32,
    pub matched_color: String,
    pub unmatched_color: String,
    pub line_width: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: Option<String>,
}

impl AppConfig {
    /// Loads defaults, then `config/default` and `config/local` if present,
    /// then `ATTENDANCE_*` environment overrides (e.g. `ATTENDANCE_API__BASE_URL`).
    pub fn new() -> Result<Self> {
        let config = Self::builder()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("ATTENDANCE").prefix_separator("_").separator("__"))
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Built-in defaults only, no files or environment.
    pub fn defaults() -> Result<Self> {
        let config: Self = Self::builder()?.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn builder() -> std::result::Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        ConfigLib::builder()
            .set_default("api.base_url", "http://localhost:8000")?
            .set_default("api.ws_base_url", "ws://localhost:8000")?
            .set_default("api.request_timeout_secs", 30)?
            .set_default("capture.frame_interval_ms", 500)?
            .set_default("capture.jpeg_quality", 0.8)?
            .set_default("capture.facing_mode", "user")?
            .set_default("capture.camera_fps", 15)?
            .set_default("channel.connect_timeout_secs", 10)?
            .set_default("channel.close_timeout_ms", 1000)?
            .set_default("channel.notification_capacity", 256)?
            .set_default("overlay.refresh_hz", 60)?
            .set_default("overlay.matched_color", "#00FF00")?
            .set_default("overlay.unmatched_color", "#FF0000")?
            .set_default("overlay.line_width", 1)?
            .set_default("logging.level", "info")
    }

    pub fn validate(&self) -> Result<()> {
        // Validate endpoints
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(AttendanceError::Config(format!("api.base_url must be an http(s) URL, got {}", self.api.base_url)));
        }
        if !self.api.ws_base_url.starts_with("ws://") && !self.api.ws_base_url.starts_with("wss://") {
            return Err(AttendanceError::Config(format!("api.ws_base_url must be a ws(s) URL, got {}", self.api.ws_base_url)));
        }

        // Validate capture configuration
        if self.capture.frame_interval_ms == 0 {
            return Err(AttendanceError::Config("frame_interval_ms must be greater than 0".into()));
        }
        if !(self.capture.jpeg_quality > 0.0 && self.capture.jpeg_quality <= 1.0) {
            return Err(AttendanceError::Config("jpeg_quality must be within (0, 1]".into()));
        }
        if self.capture.camera_fps == 0 {
            return Err(AttendanceError::Config("camera_fps must be greater than 0".into()));
        }

        // Validate channel configuration
        if self.channel.connect_timeout_secs == 0 {
            return Err(AttendanceError::Config("connect_timeout_secs must be greater than 0".into()));
        }
        if self.channel.notification_capacity == 0 {
            return Err(AttendanceError::Config("notification_capacity must be greater than 0".into()));
        }

        // Validate overlay configuration
        if self.overlay.refresh_hz == 0 {
            return Err(AttendanceError::Config("refresh_hz must be greater than 0".into()));
        }
        StrokeColor::parse_hex(&self.overlay.matched_color)
            .map_err(|e| AttendanceError::Config(format!("overlay.matched_color: {}", e)))?;
        StrokeColor::parse_hex(&self.overlay.unmatched_color)
            .map_err(|e| AttendanceError::Config(format!("overlay.unmatched_color: {}", e)))?;

        Ok(())
    }

    pub fn get_frame_interval(&self) -> Duration {
        Duration::from_millis(self.capture.frame_interval_ms)
    }

    pub fn get_request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn get_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.channel.connect_timeout_secs)
    }

    pub fn get_close_timeout(&self) -> Duration {
        Duration::from_millis(self.channel.close_timeout_ms)
    }

    pub fn get_repaint_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.overlay.refresh_hz))
    }
}

impl From<ConfigError> for AttendanceError {
    fn from(error: ConfigError) -> Self {
        AttendanceError::Config(error.to_string())
    }
}
