//! Tool-facing wrapper over a [`PredictionStore`].
//!
//! Validates caller input and shapes store snapshots into the response
//! records that tool handlers hand back to their callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PredictionError, StoreError};
use crate::store::PredictionStore;
use crate::types::*;
use crate::Processor;

/// Upper bound on images per request accepted by the tool layer.
pub const MAX_IMAGES_PER_REQUEST: u32 = 8;

/// Input for [`PredictionTools::create_prediction`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePredictionInput {
    #[serde(flatten)]
    pub request: PredictionRequest,
    #[serde(rename = "type", default = "default_type")]
    pub prediction_type: PredictionType,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_type() -> PredictionType {
    PredictionType::Generate
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateResponse {
    pub id: String,
    pub status: PredictionStatus,
    pub eta_seconds: u32,
    pub message: String,
}

/// Poll response. Which fields are present depends on the status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetResponse {
    pub id: String,
    pub status: PredictionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PredictionError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&Prediction> for GetResponse {
    fn from(p: &Prediction) -> Self {
        let base = GetResponse {
            id: p.id.clone(),
            status: p.status,
            eta_seconds: None,
            progress: None,
            result: None,
            completed_at: None,
            error: None,
            message: None,
        };

        match p.status {
            PredictionStatus::Queued => GetResponse {
                eta_seconds: p.eta_seconds,
                progress: Some(p.progress),
                message: Some("Prediction is queued and waiting to start".to_string()),
                ..base
            },
            PredictionStatus::Processing => GetResponse {
                eta_seconds: p.eta_seconds,
                progress: Some(p.progress),
                message: Some(format!("Prediction is processing ({}% complete)", p.progress)),
                ..base
            },
            PredictionStatus::Completed => GetResponse {
                result: p.result.clone(),
                completed_at: p.completed_at,
                ..base
            },
            PredictionStatus::Failed => GetResponse {
                message: Some(match &p.error {
                    Some(error) => format!("Prediction failed: {}", error.message),
                    None => "Prediction failed".to_string(),
                }),
                error: p.error.clone(),
                ..base
            },
            PredictionStatus::Cancelled => GetResponse {
                message: Some("Prediction was cancelled".to_string()),
                ..base
            },
        }
    }
}

pub type CancelResponse = CancelOutcome;

/// Error record returned to tool callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ToolError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl From<StoreError> for ToolError {
    fn from(err: StoreError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// Check a request before it reaches the store.
pub fn validate_request(request: &PredictionRequest) -> Result<(), StoreError> {
    if request.prompt.trim().is_empty() {
        return Err(StoreError::InvalidRequest("prompt must not be empty".to_string()));
    }
    if !(1..=MAX_IMAGES_PER_REQUEST).contains(&request.num_images) {
        return Err(StoreError::InvalidRequest(format!(
            "num_images must be between 1 and {}, got {}",
            MAX_IMAGES_PER_REQUEST, request.num_images
        )));
    }
    Ok(())
}

/// Create/get/cancel entry points for tool handlers.
///
/// Holds a store handle passed in by the caller; there is no process-wide
/// default store.
pub struct PredictionTools<P: Processor> {
    store: PredictionStore<P>,
}

impl<P: Processor> PredictionTools<P> {
    pub fn new(store: PredictionStore<P>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &PredictionStore<P> {
        &self.store
    }

    pub fn create_prediction(
        &self,
        input: CreatePredictionInput,
    ) -> Result<CreateResponse, ToolError> {
        validate_request(&input.request)?;
        let prediction = self
            .store
            .create(input.request, input.prediction_type, input.webhook_url)?;
        let eta_seconds = prediction.eta_seconds.unwrap_or_default();
        Ok(CreateResponse {
            id: prediction.id,
            status: prediction.status,
            eta_seconds,
            message: format!(
                "Prediction queued. Estimated time: {} seconds. Poll with the returned id.",
                eta_seconds
            ),
        })
    }

    pub fn get_prediction(&self, id: &str) -> Result<GetResponse, ToolError> {
        let prediction = self.store.get_or_throw(id)?;
        Ok(GetResponse::from(&prediction))
    }

    pub fn cancel_prediction(&self, id: &str) -> Result<CancelResponse, ToolError> {
        Ok(self.store.cancel(id)?)
    }
}
