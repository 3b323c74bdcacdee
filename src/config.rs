use std::time::Duration;

/// Configuration for a [`crate::PredictionStore`].
///
/// Use [`StoreConfig::builder()`] for ergonomic construction, or
/// [`StoreConfig::default()`] for the defaults: 100 queued predictions,
/// one hour retention swept every five minutes, no per-prediction timeout.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of predictions allowed to wait in `queued`.
    pub max_queue_size: usize,

    /// How long terminal predictions are kept before cleanup removes them.
    pub cleanup_age: Duration,

    /// Run the background cleanup sweeper.
    pub enable_auto_cleanup: bool,

    /// Period of the cleanup sweeper.
    pub cleanup_interval: Duration,

    /// Fail predictions that stay `processing` longer than this.
    /// `None` = never time out.
    pub prediction_timeout: Option<Duration>,

    /// Period of the simulated progress ticks while a prediction runs.
    pub progress_interval: Duration,

    /// Percentage points added on each progress tick.
    pub progress_step: u8,

    /// Simulated progress never goes above this until completion.
    pub progress_cap: u8,

    /// Buffer size of the lifecycle event channel.
    pub event_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            cleanup_age: Duration::from_secs(60 * 60),
            enable_auto_cleanup: true,
            cleanup_interval: Duration::from_secs(5 * 60),
            prediction_timeout: None,
            progress_interval: Duration::from_secs(1),
            progress_step: 5,
            progress_cap: 95,
            event_capacity: 256,
        }
    }
}

impl StoreConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }
}

/// Builder for [`StoreConfig`].
#[derive(Default)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Cap the number of queued predictions. Clamped to at least 1.
    pub fn with_max_queue_size(mut self, max: usize) -> Self {
        self.config.max_queue_size = max.max(1);
        self
    }

    /// Set how long terminal predictions are retained.
    pub fn with_cleanup_age(mut self, age: Duration) -> Self {
        self.config.cleanup_age = age;
        self
    }

    /// Toggle the background cleanup sweeper.
    pub fn with_auto_cleanup(mut self, enabled: bool) -> Self {
        self.config.enable_auto_cleanup = enabled;
        self
    }

    /// Set the cleanup sweeper period.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    /// Enforce a per-prediction processing timeout.
    pub fn with_prediction_timeout(mut self, timeout: Duration) -> Self {
        self.config.prediction_timeout = Some(timeout);
        self
    }

    /// Set the simulated progress tick period.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.config.progress_interval = interval;
        self
    }

    /// Set the simulated progress increment and ceiling. The ceiling is
    /// clamped below 100 so only completion reports 100%.
    pub fn with_progress_step(mut self, step: u8, cap: u8) -> Self {
        self.config.progress_step = step;
        self.config.progress_cap = cap.min(99);
        self
    }

    /// Set the lifecycle event channel buffer size.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    /// Build the final [`StoreConfig`].
    pub fn build(self) -> StoreConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.max_queue_size, 100);
        assert!(config.enable_auto_cleanup);
        assert!(config.prediction_timeout.is_none());
        assert!(config.progress_cap < 100);
    }

    #[test]
    fn test_builder_clamps() {
        let config = StoreConfig::builder()
            .with_max_queue_size(0)
            .with_progress_step(10, 150)
            .with_prediction_timeout(Duration::from_secs(30))
            .build();
        assert_eq!(config.max_queue_size, 1);
        assert_eq!(config.progress_step, 10);
        assert_eq!(config.progress_cap, 99);
        assert_eq!(config.prediction_timeout, Some(Duration::from_secs(30)));
    }
}
