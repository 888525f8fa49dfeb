use serde::{Deserialize, Serialize};

use crate::ids::GenerationId;

/// Events emitted while a generation runs. Per attempt the ordering contract is:
///
/// Started → Progress* → (Complete | Error)
///
/// with exactly one terminal event. SessionUpdate is emitted whenever the
/// session history changes (a generation landed, or the session was cleared).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    Started {
        generation_id: GenerationId,
        total_steps: u32,
    },

    Progress {
        generation_id: GenerationId,
        step: u32,
        total_steps: u32,
        elapsed_seconds: f64,
    },

    Complete {
        generation_id: GenerationId,
        image_ref: String,
        total_steps: u32,
        elapsed_seconds: f64,
    },

    Error {
        generation_id: GenerationId,
        code: String,
        message: String,
    },

    SessionUpdate {
        generation_count: usize,
        current_generation_id: Option<GenerationId>,
    },
}

impl GenerationEvent {
    pub fn generation_id(&self) -> Option<&GenerationId> {
        match self {
            Self::Started { generation_id, .. }
            | Self::Progress { generation_id, .. }
            | Self::Complete { generation_id, .. }
            | Self::Error { generation_id, .. } => Some(generation_id),
            Self::SessionUpdate { .. } => None,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Progress { .. } => "progress",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
            Self::SessionUpdate { .. } => "session_update",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}
