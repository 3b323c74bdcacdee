use std::time::Duration;

use prediction_queue::tools::CreatePredictionInput;
use prediction_queue::*;
use tracing_subscriber::EnvFilter;

/// Stands in for a blocking upstream image API.
struct FakeUpstream;

impl Processor for FakeUpstream {
    async fn process(&self, prediction: Prediction) -> anyhow::Result<serde_json::Value> {
        let seconds = eta::estimate_request(&prediction.request) / 10;
        tokio::time::sleep(Duration::from_secs(u64::from(seconds))).await;

        if prediction.request.prompt.contains("forbidden") {
            return Err(PredictionError::new("CONTENT_POLICY", "Prompt was rejected", false).into());
        }

        let images: Vec<_> = (0..prediction.request.num_images)
            .map(|i| format!("https://cdn.example.com/{}/{}.png", prediction.id, i))
            .collect();
        Ok(serde_json::json!({ "images": images }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = StoreConfig::builder()
        .with_max_queue_size(10)
        .with_prediction_timeout(Duration::from_secs(30))
        .build();
    let store = PredictionStore::new(config);
    store.set_processor(FakeUpstream);
    let tools = PredictionTools::new(store.clone());

    let mut ids = Vec::new();
    for (prompt, speed) in [
        ("a lighthouse in a storm", RenderingSpeed::Turbo),
        ("a forbidden door", RenderingSpeed::Flash),
        ("a quiet forest at dawn", RenderingSpeed::Default),
    ] {
        let created = tools.create_prediction(CreatePredictionInput {
            request: PredictionRequest::new(prompt)
                .with_num_images(2)
                .with_rendering_speed(speed),
            prediction_type: PredictionType::Generate,
            webhook_url: None,
        })?;
        println!("{} -> {}", created.id, created.message);
        ids.push(created.id);
    }

    // Cancel the last one while it is still waiting.
    if let Some(last) = ids.last() {
        let outcome = tools.cancel_prediction(last)?;
        println!("cancel {}: {}", last, outcome.message);
    }

    loop {
        let stats = store.get_stats();
        println!(
            "queued={} processing={} completed={} failed={} cancelled={}",
            stats.queued, stats.processing, stats.completed, stats.failed, stats.cancelled
        );
        if stats.queued == 0 && stats.processing == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    for id in &ids {
        println!("{}", serde_json::to_string_pretty(&tools.get_prediction(id)?)?);
    }

    store.dispose();
    Ok(())
}
