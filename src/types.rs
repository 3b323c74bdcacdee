use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PredictionError;

/// Prediction lifecycle: Queued -> Processing -> Completed/Failed,
/// or Queued -> Cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl PredictionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionStatus::Queued => "queued",
            PredictionStatus::Processing => "processing",
            PredictionStatus::Completed => "completed",
            PredictionStatus::Failed => "failed",
            PredictionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(PredictionStatus::Queued),
            "processing" => Some(PredictionStatus::Processing),
            "completed" => Some(PredictionStatus::Completed),
            "failed" => Some(PredictionStatus::Failed),
            "cancelled" => Some(PredictionStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PredictionStatus::Completed | PredictionStatus::Failed | PredictionStatus::Cancelled
        )
    }

    /// Whether a prediction in this status may move to `next`.
    ///
    /// Staying in the same status is always allowed so repeated updates
    /// stay idempotent.
    pub fn can_transition_to(&self, next: PredictionStatus) -> bool {
        use PredictionStatus::*;
        *self == next
            || matches!(
                (*self, next),
                (Queued, Processing) | (Queued, Cancelled) | (Processing, Completed | Failed)
            )
    }
}

impl fmt::Display for PredictionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of upstream operation a prediction stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionType {
    Generate,
    Edit,
}

/// Upstream speed/quality tier. Slower tiers take proportionally longer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RenderingSpeed {
    Flash,
    Turbo,
    #[default]
    Default,
    Quality,
}

/// Caller-supplied parameters for a prediction.
///
/// Only `num_images` and `rendering_speed` matter to the store (they drive
/// the ETA). Everything else the upstream API accepts (aspect ratio, style,
/// seed, edit image/mask references) rides along in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub prompt: String,
    #[serde(default = "default_num_images")]
    pub num_images: u32,
    #[serde(default)]
    pub rendering_speed: RenderingSpeed,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_num_images() -> u32 {
    1
}

impl PredictionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            num_images: 1,
            rendering_speed: RenderingSpeed::Default,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_num_images(mut self, num_images: u32) -> Self {
        self.num_images = num_images;
        self
    }

    pub fn with_rendering_speed(mut self, speed: RenderingSpeed) -> Self {
        self.rendering_speed = speed;
        self
    }

    /// Attach an upstream-specific parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// A unit of queued or in-flight work and its lifecycle record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: PredictionStatus,
    pub request: PredictionRequest,
    #[serde(rename = "type")]
    pub prediction_type: PredictionType,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: u8,
    pub eta_seconds: Option<u32>,
    pub result: Option<serde_json::Value>,
    pub error: Option<PredictionError>,
    pub webhook_url: Option<String>,
}

impl Prediction {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Partial field update applied through [`crate::PredictionStore::update`].
///
/// `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionUpdate {
    pub status: Option<PredictionStatus>,
    pub progress: Option<u8>,
    pub eta_seconds: Option<u32>,
    pub result: Option<serde_json::Value>,
    pub error: Option<PredictionError>,
}

impl PredictionUpdate {
    pub fn status(status: PredictionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }
}

/// Outcome of a cancellation attempt. Business-rule refusals are reported
/// here instead of as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub success: bool,
    pub status: PredictionStatus,
    pub message: String,
}

/// Per-status counts for a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionStats {
    pub total: usize,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            PredictionStatus::Queued,
            PredictionStatus::Processing,
            PredictionStatus::Completed,
            PredictionStatus::Failed,
            PredictionStatus::Cancelled,
        ] {
            assert_eq!(PredictionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PredictionStatus::parse("pending"), None);
    }

    #[test]
    fn test_transitions() {
        use PredictionStatus::*;
        assert!(Queued.can_transition_to(Processing));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Completed));

        assert!(!Processing.can_transition_to(Queued));
        assert!(!Processing.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Cancelled.can_transition_to(Processing));
        assert!(!Queued.can_transition_to(Completed));
    }

    #[test]
    fn test_request_deserializes_with_defaults_and_extras() {
        let request: PredictionRequest = serde_json::from_value(serde_json::json!({
            "prompt": "a lighthouse at dusk",
            "aspect_ratio": "16x9"
        }))
        .unwrap();

        assert_eq!(request.num_images, 1);
        assert_eq!(request.rendering_speed, RenderingSpeed::Default);
        assert_eq!(request.extra["aspect_ratio"], "16x9");
    }

    #[test]
    fn test_rendering_speed_wire_format() {
        let speed: RenderingSpeed = serde_json::from_str("\"QUALITY\"").unwrap();
        assert_eq!(speed, RenderingSpeed::Quality);
    }
}
