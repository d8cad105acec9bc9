// src/network/protocol.rs
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::BTreeSet;

use super::error::ProtocolError;
use crate::core::types::{FaceBox, FaceGeometry, ParticipantId, RosterUpdate, SessionId};

/// A validated inbound message. Roster and geometry slices are independent:
/// either, both or neither may be present.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    BackendError(String),
    Recognition {
        roster: Option<RosterUpdate>,
        geometry: Option<FaceGeometry>,
    },
}

impl InboundMessage {
    pub fn is_empty(&self) -> bool {
        matches!(self, InboundMessage::Recognition { roster: None, geometry: None })
    }
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    recognized: Option<Vec<ParticipantId>>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    total_faces: Option<i64>,
    #[serde(default)]
    face_locations: Option<Vec<[f64; 4]>>,
    #[serde(default)]
    recognition_status: Option<Vec<bool>>,
}

/// Decodes one JSON text frame. The whole message is rejected on any
/// violation so a bad frame never partially mutates state.
///
/// `received_at` stands in for a missing `timestamp`.
pub fn decode_inbound(payload: &str, received_at: DateTime<Utc>) -> Result<InboundMessage, ProtocolError> {
    let wire: WireMessage =
        serde_json::from_str(payload).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    // An empty error string is not an error report.
    if let Some(error) = wire.error.filter(|error| !error.is_empty()) {
        return Ok(InboundMessage::BackendError(error));
    }

    let roster = match wire.recognized {
        Some(ids) => {
            let timestamp = match wire.timestamp.as_deref() {
                Some(raw) => parse_timestamp(raw)?,
                None => received_at,
            };
            if let Some(total) = wire.total_faces.filter(|total| *total < 0) {
                return Err(ProtocolError::OutOfRange { field: "total_faces", value: total });
            }
            Some(RosterUpdate {
                recognized_ids: ids.into_iter().collect::<BTreeSet<_>>(),
                timestamp,
                total_faces: wire.total_faces,
            })
        }
        None => None,
    };

    let geometry = match (wire.face_locations, wire.recognition_status) {
        (Some(locations), Some(flags)) => {
            let boxes = locations.len();
            let flag_count = flags.len();
            let faces = locations.into_iter().map(FaceBox::from).collect();
            Some(FaceGeometry::new(faces, flags).ok_or(ProtocolError::LengthMismatch {
                boxes,
                flags: flag_count,
            })?)
        }
        (Some(_), None) => return Err(ProtocolError::MissingField("recognition_status")),
        (None, Some(_)) => return Err(ProtocolError::MissingField("face_locations")),
        (None, None) => None,
    };

    Ok(InboundMessage::Recognition { roster, geometry })
}

/// Accepts RFC 3339 and the offset-less ISO form Python's `isoformat()` emits.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ProtocolError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| ProtocolError::InvalidTimestamp(raw.to_string()))
}

/// `{ws_base}/ws/attendance/{session_id}`
pub fn channel_url(ws_base: &str, session_id: SessionId) -> String {
    format!("{}/ws/attendance/{}", ws_base.trim_end_matches('/'), session_id)
}
