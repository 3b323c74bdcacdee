//! # Prediction Queue
//!
//! Pseudo-asynchronous job store for synchronous image-generation APIs.
//!
//! Upstream APIs that block until the images are ready offer no job ids and
//! nothing to poll. This crate puts a local prediction store in front of
//! them: callers get an id back immediately and poll for the outcome while
//! the store feeds requests to the upstream one at a time.
//!
//! ## Features
//!
//! - Strict FIFO admission with a bounded queue
//! - Single-flight dispatch to one [`Processor`]
//! - Simulated progress while the upstream call is outstanding
//! - Cancellation of predictions that have not started
//! - Classified failures (`code`, `message`, `retryable`)
//! - Optional per-prediction timeout
//! - Periodic cleanup of finished predictions
//! - Lifecycle events over a broadcast channel
//!
//! ## Quick Start
//!
//! 1. Implement [`Processor`] (or pass an async closure)
//! 2. Create a [`PredictionStore`] with a [`StoreConfig`]
//! 3. Register the processor with [`PredictionStore::set_processor()`]
//! 4. Create predictions and poll them, directly or through [`PredictionTools`]
//!
//! See `demos/basic_usage.rs` for a complete example.

pub mod config;
pub mod error;
pub mod eta;
pub mod events;
pub mod store;
pub mod timers;
pub mod tools;
pub mod types;

pub use config::{StoreConfig, StoreConfigBuilder};
pub use error::{PredictionError, StoreError};
pub use events::PredictionEvent;
pub use store::PredictionStore;
pub use tools::PredictionTools;
pub use types::{
    CancelOutcome, Prediction, PredictionRequest, PredictionStats, PredictionStatus,
    PredictionType, PredictionUpdate, RenderingSpeed,
};

use std::future::Future;

/// The capability that performs the real work for a prediction, typically
/// one blocking call to the upstream image API.
///
/// Return `Err` to fail the prediction. Wrap a [`PredictionError`] in the
/// `anyhow::Error` to choose the recorded code and retryability; any other
/// error is recorded as a non-retryable `PROCESSING_ERROR`. The store never
/// retries on its own.
///
/// Async closures taking a [`Prediction`] implement this automatically.
///
/// # Example
///
/// ```ignore
/// use prediction_queue::*;
///
/// struct UpstreamProcessor {
///     client: reqwest::Client,
/// }
///
/// impl Processor for UpstreamProcessor {
///     async fn process(&self, prediction: Prediction) -> anyhow::Result<serde_json::Value> {
///         let response = self
///             .client
///             .post("https://api.example.com/generate")
///             .json(&prediction.request)
///             .send()
///             .await?;
///         if response.status().as_u16() == 429 {
///             return Err(PredictionError::new("RATE_LIMITED", "Upstream rate limit", true).into());
///         }
///         Ok(response.json().await?)
///     }
/// }
/// ```
pub trait Processor: Send + Sync + 'static {
    /// Run the upstream call for `prediction` and return its output.
    fn process(
        &self,
        prediction: Prediction,
    ) -> impl Future<Output = anyhow::Result<serde_json::Value>> + Send;
}

impl<F, Fut> Processor for F
where
    F: Fn(Prediction) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    fn process(
        &self,
        prediction: Prediction,
    ) -> impl Future<Output = anyhow::Result<serde_json::Value>> + Send {
        self(prediction)
    }
}
