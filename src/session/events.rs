// src/session/events.rs
use chrono::{DateTime, Utc};

use crate::core::types::{FaceCounts, Participant, SessionId};

/// User-facing notices (the toasts of the attendance screen).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotification {
    Connected { session_id: SessionId },
    ParticipantRecognized { participant: Participant, at: DateTime<Utc> },
    FaceCountsUpdated(FaceCounts),
    /// More recognized ids than detected faces in one message.
    InconsistentFaceCount(FaceCounts),
    BackendError(String),
    MessageDiscarded(String),
    ChannelClosed { code: Option<u16>, reason: String },
    ConnectionError(String),
    BatchProcessed { session_id: SessionId, total_recognized: usize },
}
