use serde::{Deserialize, Serialize};

use crate::error::PredictionError;
use crate::types::PredictionType;

/// Lifecycle notifications broadcast by the store.
///
/// Subscribe with [`crate::PredictionStore::subscribe`]. Slow receivers may
/// miss events (see `tokio::sync::broadcast` lag semantics); the store
/// itself remains the source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PredictionEvent {
    Queued {
        id: String,
        prediction_type: PredictionType,
        eta_seconds: u32,
        webhook_url: Option<String>,
    },
    Started {
        id: String,
    },
    Progress {
        id: String,
        progress: u8,
    },
    Completed {
        id: String,
        webhook_url: Option<String>,
    },
    Failed {
        id: String,
        error: PredictionError,
        webhook_url: Option<String>,
    },
    Cancelled {
        id: String,
    },
    Removed {
        id: String,
    },
}

impl PredictionEvent {
    /// Id of the prediction this event is about.
    pub fn id(&self) -> &str {
        match self {
            PredictionEvent::Queued { id, .. }
            | PredictionEvent::Started { id }
            | PredictionEvent::Progress { id, .. }
            | PredictionEvent::Completed { id, .. }
            | PredictionEvent::Failed { id, .. }
            | PredictionEvent::Cancelled { id }
            | PredictionEvent::Removed { id } => id,
        }
    }
}
