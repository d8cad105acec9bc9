// src/network/backend.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::error::ApiError;
use super::protocol::parse_timestamp;
use crate::capture::VideoFile;
use crate::core::types::{BatchOutcome, Participant, ParticipantId, SessionId, SessionInfo};

/// REST collaborators of the session controller.
#[async_trait]
pub trait AttendanceBackend: Send + Sync {
    async fn enrolled_participants(&self, class_id: i64) -> Result<Vec<Participant>, ApiError>;
    async fn open_session(&self, class_id: i64) -> Result<SessionInfo, ApiError>;
    async fn end_session(&self, session_id: SessionId) -> Result<(), ApiError>;
    async fn process_video(&self, session_id: SessionId, video: &VideoFile) -> Result<BatchOutcome, ApiError>;
}

#[derive(Debug, Clone)]
pub struct Endpoints {
    base: String,
}

impl Endpoints {
    pub fn new(base: &str) -> Self {
        Self { base: base.trim_end_matches('/').to_string() }
    }

    pub fn class_students(&self, class_id: i64) -> String {
        format!("{}/classes/{}/students", self.base, class_id)
    }

    pub fn class_sessions(&self, class_id: i64) -> String {
        format!("{}/classes/{}/bouts", self.base, class_id)
    }

    pub fn end_session(&self, session_id: SessionId) -> String {
        format!("{}/bouts/{}/end", self.base, session_id)
    }

    pub fn process_video(&self, session_id: SessionId) -> String {
        format!("{}/bouts/{}/process-video", self.base, session_id)
    }
}

#[derive(Debug, Deserialize)]
struct SessionRecord {
    id: i64,
    class_id: i64,
    start_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoResult {
    recognized_students: Vec<ParticipantId>,
    total_recognized: usize,
    processing_time: String,
}

pub struct HttpBackend {
    client: Client,
    endpoints: Endpoints,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoints: Endpoints::new(base_url),
        })
    }

    async fn checked(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status { status: status.as_u16(), body })
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let response = Self::checked(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

fn parse_backend_time(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    parse_timestamp(raw).map_err(|e| ApiError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl AttendanceBackend for HttpBackend {
    async fn enrolled_participants(&self, class_id: i64) -> Result<Vec<Participant>, ApiError> {
        let url = self.endpoints.class_students(class_id);
        debug!(%url, "Fetching enrolled participants");
        let response = self.client.get(&url).send().await?;
        Self::json(response).await
    }

    async fn open_session(&self, class_id: i64) -> Result<SessionInfo, ApiError> {
        let url = self.endpoints.class_sessions(class_id);
        let response = self.client.post(&url).send().await?;
        let record: SessionRecord = Self::json(response).await?;

        let started_at = match record.start_time.as_deref() {
            Some(raw) => parse_backend_time(raw)?,
            None => Utc::now(),
        };
        info!(session_id = record.id, class_id = record.class_id, "Session opened");
        Ok(SessionInfo {
            session_id: SessionId(record.id),
            class_id: record.class_id,
            started_at,
        })
    }

    async fn end_session(&self, session_id: SessionId) -> Result<(), ApiError> {
        let url = self.endpoints.end_session(session_id);
        let response = self.client.patch(&url).send().await?;
        Self::checked(response).await?;
        info!(%session_id, "Session ended");
        Ok(())
    }

    async fn process_video(&self, session_id: SessionId, video: &VideoFile) -> Result<BatchOutcome, ApiError> {
        let bytes = video
            .read_bytes()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("video unreadable: {}", e)))?;
        let part = Part::bytes(bytes)
            .file_name(video.file_name().to_string())
            .mime_str(video.mime_type())?;
        let form = Form::new().part("video_file", part);

        info!(%session_id, file = video.file_name(), bytes = video.size_bytes(), "Uploading video");
        let response = self
            .client
            .post(self.endpoints.process_video(session_id))
            .multipart(form)
            .send()
            .await?;
        let result: VideoResult = Self::json(response).await?;

        Ok(BatchOutcome {
            recognized_ids: result.recognized_students.into_iter().collect(),
            total_recognized: result.total_recognized,
            processed_at: parse_backend_time(&result.processing_time)?,
        })
    }
}
