#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use prediction_queue::*;
use tokio::sync::Semaphore;

/// Completes immediately, echoing the prompt back.
pub struct EchoProcessor;

impl Processor for EchoProcessor {
    async fn process(&self, prediction: Prediction) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({ "prompt": prediction.request.prompt }))
    }
}

/// Sleeps for `delay` before completing.
pub struct DelayedProcessor {
    pub delay: Duration,
}

impl Processor for DelayedProcessor {
    async fn process(&self, prediction: Prediction) -> anyhow::Result<serde_json::Value> {
        tokio::time::sleep(self.delay).await;
        Ok(serde_json::json!({
            "images": vec!["image.png"; prediction.request.num_images as usize]
        }))
    }
}

/// Blocks each call until the test releases a permit, recording the order
/// in which predictions reached the processor.
#[derive(Clone)]
pub struct GatedProcessor {
    pub gate: Arc<Semaphore>,
    pub started: Arc<Mutex<Vec<String>>>,
}

impl GatedProcessor {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            started: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn release(&self, calls: usize) {
        self.gate.add_permits(calls);
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

impl Processor for GatedProcessor {
    async fn process(&self, prediction: Prediction) -> anyhow::Result<serde_json::Value> {
        self.started.lock().unwrap().push(prediction.id.clone());
        let permit = self.gate.acquire().await?;
        permit.forget();
        Ok(serde_json::json!({ "id": prediction.id }))
    }
}

/// Fails every call, with a classified error when one is given.
pub struct FailingProcessor {
    pub error: Option<PredictionError>,
}

impl Processor for FailingProcessor {
    async fn process(&self, _prediction: Prediction) -> anyhow::Result<serde_json::Value> {
        match &self.error {
            Some(error) => Err(error.clone().into()),
            None => Err(anyhow::anyhow!("upstream returned HTTP 500")),
        }
    }
}

/// Panics on prompts equal to "panic", completes otherwise.
pub struct PanickingProcessor;

impl Processor for PanickingProcessor {
    async fn process(&self, prediction: Prediction) -> anyhow::Result<serde_json::Value> {
        if prediction.request.prompt == "panic" {
            panic!("processor exploded");
        }
        Ok(serde_json::Value::Null)
    }
}

pub fn quiet_config() -> StoreConfig {
    StoreConfig::builder().with_auto_cleanup(false).build()
}

pub fn request(prompt: &str) -> PredictionRequest {
    PredictionRequest::new(prompt)
}

/// Poll until the prediction reaches `status`, advancing (paused) time in
/// small steps.
pub async fn wait_for_status<P: Processor>(
    store: &PredictionStore<P>,
    id: &str,
    status: PredictionStatus,
) -> Prediction {
    for _ in 0..1000 {
        if let Some(prediction) = store.get(id) {
            if prediction.status == status {
                return prediction;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "prediction {} never reached {}, last seen {:?}",
        id,
        status,
        store.get(id).map(|p| p.status)
    );
}
