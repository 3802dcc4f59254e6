//! Graph Events
//!
//! Events emitted by the graph cache for external consumers to react to
//! graph changes.

use crate::domain::ports::ParticipantId;
use serde::{Deserialize, Serialize};

/// Events emitted by the graph cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphEvent {
    /// A new view was published
    Refreshed {
        generation: u64,
        participants: usize,
        resolved: usize,
        unresolved: usize,
    },

    /// A refresh failed; the previous view stays current
    RefreshFailed { reason: String },

    /// A participant appeared in the graph
    ParticipantJoined { participant: ParticipantId },

    /// A participant is no longer in the graph
    ParticipantLeft { participant: ParticipantId },
}

impl GraphEvent {
    /// Get the participant associated with this event
    pub fn participant(&self) -> Option<&ParticipantId> {
        match self {
            GraphEvent::ParticipantJoined { participant }
            | GraphEvent::ParticipantLeft { participant } => Some(participant),
            _ => None,
        }
    }

    /// Check if this is a refresh outcome event
    pub fn is_refresh_event(&self) -> bool {
        matches!(
            self,
            GraphEvent::Refreshed { .. } | GraphEvent::RefreshFailed { .. }
        )
    }
}
