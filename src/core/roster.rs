// src/core/roster.rs
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::types::{FaceCounts, Participant, ParticipantId, PresenceState, RosterUpdate};

#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub participant: Participant,
    pub presence: PresenceState,
}

/// Immutable view of the roster; replaced wholesale on every fold.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RosterSnapshot {
    pub entries: Vec<RosterEntry>,
    pub face_counts: FaceCounts,
}

impl RosterSnapshot {
    pub fn present_count(&self) -> usize {
        self.entries.iter().filter(|e| e.presence.recognized).count()
    }

    pub fn get(&self, id: ParticipantId) -> Option<&RosterEntry> {
        self.entries.iter().find(|e| e.participant.id == id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FoldOutcome {
    /// Participants whose presence flipped false -> true in this fold.
    pub newly_recognized: Vec<Participant>,
    /// Recognized ids that match no enrolled participant.
    pub unknown_ids: Vec<ParticipantId>,
    pub face_counts: FaceCounts,
}

/// Monotone OR-merge of one frame's recognized ids into the presence list.
///
/// Returns the next presence list and the indices that flipped to recognized.
/// Entries already recognized keep their first timestamp.
pub fn fold_presence(
    presence: &[PresenceState],
    recognized_ids: &BTreeSet<ParticipantId>,
    timestamp: DateTime<Utc>,
) -> (Vec<PresenceState>, Vec<usize>) {
    let mut flipped = Vec::new();
    let next = presence
        .iter()
        .enumerate()
        .map(|(index, state)| {
            let seen_now = recognized_ids.contains(&state.participant_id);
            if state.recognized || !seen_now {
                return state.clone();
            }
            flipped.push(index);
            PresenceState {
                participant_id: state.participant_id,
                recognized: true,
                first_recognized_at: state.first_recognized_at.or(Some(timestamp)),
            }
        })
        .collect();

    (next, flipped)
}

/// Sole writer of PresenceState for the active session.
pub struct RosterReconciler {
    snapshot: RwLock<Arc<RosterSnapshot>>,
}

impl RosterReconciler {
    pub fn new(participants: Vec<Participant>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Self::initial(participants))),
        }
    }

    fn initial(participants: Vec<Participant>) -> RosterSnapshot {
        RosterSnapshot {
            entries: participants
                .into_iter()
                .map(|participant| RosterEntry {
                    presence: PresenceState::absent(participant.id),
                    participant,
                })
                .collect(),
            face_counts: FaceCounts::default(),
        }
    }

    /// Replaces the enrolled participant list. Only valid between sessions.
    pub fn enroll(&self, participants: Vec<Participant>) {
        *self.snapshot.write() = Arc::new(Self::initial(participants));
    }

    /// Clears every presence back to not-recognized for a new session.
    pub fn reset(&self) {
        let mut guard = self.snapshot.write();
        let participants = guard.entries.iter().map(|e| e.participant.clone()).collect();
        *guard = Arc::new(Self::initial(participants));
    }

    pub fn snapshot(&self) -> Arc<RosterSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn participant_count(&self) -> usize {
        self.snapshot.read().entries.len()
    }

    pub fn fold(&self, update: &RosterUpdate) -> FoldOutcome {
        let mut guard = self.snapshot.write();

        let presence: Vec<PresenceState> = guard.entries.iter().map(|e| e.presence.clone()).collect();
        let (next, flipped) = fold_presence(&presence, &update.recognized_ids, update.timestamp);

        let unknown_ids: Vec<ParticipantId> = update
            .recognized_ids
            .iter()
            .copied()
            .filter(|id| !guard.entries.iter().any(|e| e.participant.id == *id))
            .collect();

        let face_counts = FaceCounts::from_update(update);
        let newly_recognized = flipped
            .iter()
            .map(|&index| guard.entries[index].participant.clone())
            .collect();

        let entries = guard
            .entries
            .iter()
            .zip(next)
            .map(|(entry, presence)| RosterEntry {
                participant: entry.participant.clone(),
                presence,
            })
            .collect();

        *guard = Arc::new(RosterSnapshot { entries, face_counts });

        FoldOutcome {
            newly_recognized,
            unknown_ids,
            face_counts,
        }
    }
}
