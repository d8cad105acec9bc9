// src/core/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Enrollment identifier issued by the backend.
pub type ParticipantId = i64;

/// Backend-issued routing key for one attendance session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub i64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Static enrollment fact; immutable for a session's duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "image_path")]
    pub portrait_ref: String,
}

impl Participant {
    /// Resolves the portrait against the API's static asset root.
    pub fn portrait_url(&self, api_base: &str) -> String {
        format!(
            "{}/static/{}",
            api_base.trim_end_matches('/'),
            self.portrait_ref.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceState {
    pub participant_id: ParticipantId,
    pub recognized: bool,
    pub first_recognized_at: Option<DateTime<Utc>>,
}

impl PresenceState {
    pub fn absent(participant_id: ParticipantId) -> Self {
        Self {
            participant_id,
            recognized: false,
            first_recognized_at: None,
        }
    }
}

/// The roster slice of a recognition message.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterUpdate {
    pub recognized_ids: BTreeSet<ParticipantId>,
    pub timestamp: DateTime<Utc>,
    pub total_faces: Option<i64>,
}

/// One detected face in native-pixel space, as `(top, right, bottom, left)` on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl From<[f64; 4]> for FaceBox {
    fn from([top, right, bottom, left]: [f64; 4]) -> Self {
        Self { top, right, bottom, left }
    }
}

/// The geometry slice of a recognition message. Boxes and flags are
/// index-aligned; construction goes through `FaceGeometry::new`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FaceGeometry {
    boxes: Vec<FaceBox>,
    flags: Vec<bool>,
}

impl FaceGeometry {
    /// Returns `None` when the two sequences differ in length.
    pub fn new(boxes: Vec<FaceBox>, flags: Vec<bool>) -> Option<Self> {
        if boxes.len() != flags.len() {
            return None;
        }
        Some(Self { boxes, flags })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn faces(&self) -> impl Iterator<Item = (&FaceBox, bool)> + '_ {
        self.boxes.iter().zip(self.flags.iter().copied())
    }
}

/// Per-message face summary. `unrecognized` is deliberately signed: a
/// negative value means the backend reported more matches than faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FaceCounts {
    pub total: i64,
    pub recognized: i64,
    pub unrecognized: i64,
}

impl FaceCounts {
    pub fn from_update(update: &RosterUpdate) -> Self {
        let total = update.total_faces.unwrap_or(0);
        let recognized = update.recognized_ids.len() as i64;
        Self {
            total,
            recognized,
            unrecognized: total.saturating_sub(recognized),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.unrecognized >= 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub class_id: i64,
    pub started_at: DateTime<Utc>,
}

/// Result of the batch (upload) workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub recognized_ids: BTreeSet<ParticipantId>,
    pub total_recognized: usize,
    pub processed_at: DateTime<Utc>,
}
