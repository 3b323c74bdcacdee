use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinError};
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::error::{PredictionError, Result, StoreError};
use crate::eta;
use crate::events::PredictionEvent;
use crate::timers::{CleanupSweeper, ProgressSimulator};
use crate::types::*;
use crate::Processor;

/// In-memory prediction store with serialized FIFO dispatch.
///
/// The store owns every [`Prediction`] and is the only thing that mutates
/// them. Callers receive cloned snapshots. Jobs are admitted as `queued`,
/// then handed one at a time to the registered [`Processor`]; while a job
/// runs its progress is simulated, and terminal jobs are swept after
/// [`StoreConfig::cleanup_age`].
///
/// `PredictionStore` is a cheap handle (`Clone` shares the same store).
/// It must be created inside a Tokio runtime; background work is spawned
/// onto that runtime even when methods are called from other threads.
pub struct PredictionStore<P: Processor> {
    inner: Arc<StoreInner<P>>,
}

impl<P: Processor> Clone for PredictionStore<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct StoreInner<P> {
    config: StoreConfig,
    runtime: Handle,
    state: Mutex<StoreState<P>>,
    events: broadcast::Sender<PredictionEvent>,
    sweeper: Mutex<Option<CleanupSweeper>>,
}

struct StoreState<P> {
    predictions: HashMap<String, Prediction>,
    /// Ids of `queued` predictions, oldest first.
    queue: VecDeque<String>,
    processor: Option<Arc<P>>,
    /// The single prediction allowed to be `processing`.
    in_flight: Option<InFlight>,
    simulators: HashMap<String, ProgressSimulator>,
}

struct InFlight {
    prediction_id: String,
    work: Option<AbortHandle>,
}

/// Result of applying an update while holding the state lock.
struct Applied {
    prediction: Prediction,
    became_terminal: bool,
}

/// How a processor call ended.
enum Outcome {
    Finished(anyhow::Result<serde_json::Value>),
    Panicked(String),
    Aborted,
    TimedOut(Duration),
}

impl<P: Processor> PredictionStore<P> {
    /// Create a store and start its cleanup sweeper (when enabled).
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(config: StoreConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let inner = Arc::new(StoreInner {
            runtime: Handle::current(),
            state: Mutex::new(StoreState {
                predictions: HashMap::new(),
                queue: VecDeque::new(),
                processor: None,
                in_flight: None,
                simulators: HashMap::new(),
            }),
            events,
            sweeper: Mutex::new(None),
            config,
        });

        if inner.config.enable_auto_cleanup {
            let weak = Arc::downgrade(&inner);
            let sweeper = CleanupSweeper::start(
                &inner.runtime,
                inner.config.cleanup_interval,
                move || match weak.upgrade() {
                    Some(inner) => {
                        inner.cleanup();
                        true
                    }
                    None => false,
                },
            );
            *lock_or_recover(&inner.sweeper) = Some(sweeper);
        }

        Self { inner }
    }

    /// The active configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Admit a new prediction as `queued` and trigger dispatch.
    ///
    /// Fails with [`StoreError::CapacityExceeded`] when `max_queue_size`
    /// predictions are already waiting.
    pub fn create(
        &self,
        request: PredictionRequest,
        prediction_type: PredictionType,
        webhook_url: Option<String>,
    ) -> Result<Prediction> {
        let prediction = {
            let mut state = self.inner.lock_state();
            let max_queue_size = self.inner.config.max_queue_size;
            if state.queue.len() >= max_queue_size {
                warn!(max_queue_size, "Rejecting prediction, queue is full");
                return Err(StoreError::CapacityExceeded { max_queue_size });
            }

            let eta_seconds = eta::estimate_request(&request);
            let prediction = Prediction {
                id: uuid::Uuid::new_v4().to_string(),
                status: PredictionStatus::Queued,
                request,
                prediction_type,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
                progress: 0,
                eta_seconds: Some(eta_seconds),
                result: None,
                error: None,
                webhook_url,
            };

            state.queue.push_back(prediction.id.clone());
            state
                .predictions
                .insert(prediction.id.clone(), prediction.clone());
            self.inner.emit(PredictionEvent::Queued {
                id: prediction.id.clone(),
                prediction_type,
                eta_seconds,
                webhook_url: prediction.webhook_url.clone(),
            });
            prediction
        };

        info!(
            prediction_id = %prediction.id,
            prediction_type = ?prediction.prediction_type,
            eta_seconds = ?prediction.eta_seconds,
            "Prediction queued"
        );
        self.inner.schedule_dispatch();
        Ok(prediction)
    }

    /// Snapshot of a prediction, if it exists.
    pub fn get(&self, id: &str) -> Option<Prediction> {
        self.inner.lock_state().predictions.get(id).cloned()
    }

    /// Snapshot of a prediction, or [`StoreError::NotFound`].
    pub fn get_or_throw(&self, id: &str) -> Result<Prediction> {
        self.get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Apply a partial update under the state-machine rules.
    ///
    /// Progress only moves forward. `result` is kept only on `completed`
    /// predictions and `error` only on `failed` ones. Updates to a terminal
    /// prediction that do not change its status are ignored; any other
    /// illegal status change is rejected with
    /// [`StoreError::InvalidTransition`].
    pub fn update(&self, id: &str, update: PredictionUpdate) -> Result<Prediction> {
        self.inner.transition(id, update)
    }

    /// Move a queued prediction to `processing`.
    ///
    /// Fails with [`StoreError::ProcessorBusy`] if another prediction is
    /// already processing.
    pub fn mark_processing(&self, id: &str) -> Result<Prediction> {
        self.inner
            .transition(id, PredictionUpdate::status(PredictionStatus::Processing))
    }

    /// Record a successful result and let the next queued prediction start.
    pub fn mark_completed(&self, id: &str, result: serde_json::Value) -> Result<Prediction> {
        self.inner.transition(
            id,
            PredictionUpdate {
                status: Some(PredictionStatus::Completed),
                result: Some(result),
                ..Default::default()
            },
        )
    }

    /// Record a failure and let the next queued prediction start.
    pub fn mark_failed(&self, id: &str, error: PredictionError) -> Result<Prediction> {
        self.inner.transition(
            id,
            PredictionUpdate {
                status: Some(PredictionStatus::Failed),
                error: Some(error),
                ..Default::default()
            },
        )
    }

    /// Cancel a prediction that has not started yet.
    ///
    /// Only `queued` predictions can be cancelled. For any other status the
    /// prediction is left untouched and the outcome reports its current
    /// status. Errors only when the id is unknown.
    pub fn cancel(&self, id: &str) -> Result<CancelOutcome> {
        let mut state = self.inner.lock_state();
        let status = state
            .predictions
            .get(id)
            .map(|p| p.status)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let refusal = match status {
            PredictionStatus::Queued => None,
            PredictionStatus::Processing => {
                Some("Prediction is already processing and cannot be cancelled")
            }
            PredictionStatus::Completed => Some("Prediction has already completed"),
            PredictionStatus::Failed => Some("Prediction has already failed"),
            PredictionStatus::Cancelled => Some("Prediction was already cancelled"),
        };
        if let Some(message) = refusal {
            debug!(prediction_id = %id, %status, "Cancel refused");
            return Ok(CancelOutcome {
                success: false,
                status,
                message: message.to_string(),
            });
        }

        let applied = self.inner.apply_locked(
            &mut state,
            id,
            PredictionUpdate::status(PredictionStatus::Cancelled),
        )?;
        drop(state);

        info!(prediction_id = %id, "Prediction cancelled");
        Ok(CancelOutcome {
            success: true,
            status: applied.prediction.status,
            message: "Prediction cancelled".to_string(),
        })
    }

    /// Remove a prediction regardless of status. Returns whether it existed.
    ///
    /// Deleting the processing prediction aborts its processor call and
    /// frees the slot for the next queued prediction.
    pub fn delete(&self, id: &str) -> bool {
        let (existed, released) = {
            let mut state = self.inner.lock_state();
            let existed = state.predictions.remove(id).is_some();
            state.queue.retain(|queued| queued != id);
            let released = release_locked(&mut state, id);
            if existed {
                self.inner.emit(PredictionEvent::Removed { id: id.to_string() });
            }
            (existed, released)
        };

        if released {
            self.inner.schedule_dispatch();
        }
        if existed {
            debug!(prediction_id = %id, "Prediction deleted");
        }
        existed
    }

    /// All predictions, oldest first.
    pub fn get_all(&self) -> Vec<Prediction> {
        let state = self.inner.lock_state();
        sorted_by_creation(state.predictions.values())
    }

    /// Predictions in `status`, oldest first.
    pub fn get_by_status(&self, status: PredictionStatus) -> Vec<Prediction> {
        let state = self.inner.lock_state();
        sorted_by_creation(state.predictions.values().filter(|p| p.status == status))
    }

    /// The oldest queued prediction: the one dispatch will start next.
    pub fn get_next_queued(&self) -> Option<Prediction> {
        let state = self.inner.lock_state();
        state
            .queue
            .iter()
            .filter_map(|id| state.predictions.get(id))
            .find(|p| p.status == PredictionStatus::Queued)
            .cloned()
    }

    /// Per-status counts.
    pub fn get_stats(&self) -> PredictionStats {
        let state = self.inner.lock_state();
        let mut stats = PredictionStats {
            total: state.predictions.len(),
            ..Default::default()
        };
        for prediction in state.predictions.values() {
            match prediction.status {
                PredictionStatus::Queued => stats.queued += 1,
                PredictionStatus::Processing => stats.processing += 1,
                PredictionStatus::Completed => stats.completed += 1,
                PredictionStatus::Failed => stats.failed += 1,
                PredictionStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Register the processor and start draining queued predictions.
    /// Replaces any previously registered processor.
    pub fn set_processor(&self, processor: P) {
        self.inner.lock_state().processor = Some(Arc::new(processor));
        info!("Processor registered");
        self.inner.schedule_dispatch();
    }

    /// Detach the processor. A prediction already processing finishes;
    /// queued predictions wait for the next [`set_processor`](Self::set_processor).
    pub fn remove_processor(&self) {
        self.inner.lock_state().processor = None;
        info!("Processor removed");
    }

    /// Remove terminal predictions that finished before the retention window.
    /// Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        self.inner.cleanup()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<PredictionEvent> {
        self.inner.events.subscribe()
    }

    /// Stop all timers, abort the in-flight processor call, drop every
    /// prediction and detach the processor. Safe to call repeatedly.
    pub fn dispose(&self) {
        if let Some(sweeper) = lock_or_recover(&self.inner.sweeper).take() {
            sweeper.stop();
        }

        let mut state = self.inner.lock_state();
        for (_, simulator) in state.simulators.drain() {
            simulator.stop();
        }
        if let Some(in_flight) = state.in_flight.take() {
            if let Some(work) = in_flight.work {
                work.abort();
            }
        }
        let dropped = state.predictions.len();
        state.predictions.clear();
        state.queue.clear();
        state.processor = None;
        drop(state);

        info!(dropped, "Prediction store disposed");
    }
}

impl<P: Processor> StoreInner<P> {
    fn lock_state(&self) -> MutexGuard<'_, StoreState<P>> {
        lock_or_recover(&self.state)
    }

    fn emit(&self, event: PredictionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Lock, apply, and re-trigger dispatch if the prediction finished.
    fn transition(self: &Arc<Self>, id: &str, update: PredictionUpdate) -> Result<Prediction> {
        let applied = {
            let mut state = self.lock_state();
            self.apply_locked(&mut state, id, update)?
        };
        if applied.became_terminal {
            self.schedule_dispatch();
        }
        Ok(applied.prediction)
    }

    fn apply_locked(
        self: &Arc<Self>,
        state: &mut StoreState<P>,
        id: &str,
        update: PredictionUpdate,
    ) -> Result<Applied> {
        let not_found = || StoreError::NotFound(id.to_string());
        let current = state.predictions.get(id).ok_or_else(not_found)?.status;
        let next = update.status.unwrap_or(current);

        if !current.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: current,
                to: next,
            });
        }
        if current.is_terminal() {
            let prediction = state.predictions.get(id).cloned().ok_or_else(not_found)?;
            return Ok(Applied {
                prediction,
                became_terminal: false,
            });
        }
        if next == PredictionStatus::Processing && current == PredictionStatus::Queued {
            if let Some(in_flight) = &state.in_flight {
                return Err(StoreError::ProcessorBusy(in_flight.prediction_id.clone()));
            }
        }

        let now = Utc::now();
        let (prediction, progressed) = {
            let p = state.predictions.get_mut(id).ok_or_else(not_found)?;
            let before = p.progress;

            if let Some(progress) = update.progress {
                p.progress = p.progress.max(progress.min(100));
            }
            if let Some(eta_seconds) = update.eta_seconds {
                p.eta_seconds = Some(eta_seconds);
            }
            if next != current {
                p.status = next;
                match next {
                    PredictionStatus::Processing => {
                        if p.started_at.is_none() {
                            p.started_at = Some(now);
                        }
                    }
                    PredictionStatus::Completed => {
                        p.progress = 100;
                        p.eta_seconds = Some(0);
                        p.completed_at = Some(now);
                    }
                    PredictionStatus::Failed | PredictionStatus::Cancelled => {
                        p.eta_seconds = None;
                        p.completed_at = Some(now);
                    }
                    PredictionStatus::Queued => {}
                }
            }
            match p.status {
                PredictionStatus::Completed => {
                    if let Some(result) = update.result {
                        p.result = Some(result);
                    }
                }
                PredictionStatus::Failed => {
                    if let Some(error) = update.error {
                        p.error = Some(error);
                    }
                }
                _ => {}
            }
            (p.clone(), p.progress > before)
        };

        if progressed && !next.is_terminal() {
            self.emit(PredictionEvent::Progress {
                id: id.to_string(),
                progress: prediction.progress,
            });
        }

        if next == current {
            return Ok(Applied {
                prediction,
                became_terminal: false,
            });
        }

        match next {
            PredictionStatus::Processing => {
                state.queue.retain(|queued| queued != id);
                state.in_flight = Some(InFlight {
                    prediction_id: id.to_string(),
                    work: None,
                });
                let simulator = self.start_progress(id);
                state.simulators.insert(id.to_string(), simulator);
                self.emit(PredictionEvent::Started { id: id.to_string() });
            }
            PredictionStatus::Completed => {
                release_locked(state, id);
                self.emit(PredictionEvent::Completed {
                    id: id.to_string(),
                    webhook_url: prediction.webhook_url.clone(),
                });
            }
            PredictionStatus::Failed => {
                release_locked(state, id);
                self.emit(PredictionEvent::Failed {
                    id: id.to_string(),
                    error: prediction
                        .error
                        .clone()
                        .unwrap_or_else(|| PredictionError::unknown("No error recorded")),
                    webhook_url: prediction.webhook_url.clone(),
                });
            }
            PredictionStatus::Cancelled => {
                state.queue.retain(|queued| queued != id);
                self.emit(PredictionEvent::Cancelled { id: id.to_string() });
            }
            PredictionStatus::Queued => {}
        }

        Ok(Applied {
            became_terminal: next.is_terminal(),
            prediction,
        })
    }

    fn start_progress(self: &Arc<Self>, id: &str) -> ProgressSimulator {
        let weak = Arc::downgrade(self);
        let prediction_id = id.to_string();
        let step = self.config.progress_step;
        let cap = self.config.progress_cap;
        ProgressSimulator::start(
            &self.runtime,
            id,
            self.config.progress_interval,
            move || match weak.upgrade() {
                Some(inner) => inner.advance_progress(&prediction_id, step, cap),
                None => false,
            },
        )
    }

    /// One simulated progress tick. Returns `false` once the prediction is
    /// no longer processing.
    fn advance_progress(self: &Arc<Self>, id: &str, step: u8, cap: u8) -> bool {
        let mut state = self.lock_state();
        let current = match state.predictions.get(id) {
            Some(p) if p.status == PredictionStatus::Processing => p.progress,
            _ => return false,
        };
        let target = current.saturating_add(step).min(cap);
        if target > current {
            // Cannot fail: the prediction exists and stays processing.
            let _ = self.apply_locked(&mut state, id, PredictionUpdate::progress(target));
        }
        true
    }

    fn cleanup(&self) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(self.config.cleanup_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let mut state = self.lock_state();
        let expired: Vec<String> = state
            .predictions
            .values()
            .filter(|p| p.is_terminal() && p.completed_at.is_some_and(|done| done < cutoff))
            .map(|p| p.id.clone())
            .collect();

        for id in &expired {
            state.predictions.remove(id);
            self.emit(PredictionEvent::Removed { id: id.clone() });
        }
        let remaining = state.predictions.len();
        drop(state);

        if !expired.is_empty() {
            debug!(removed = expired.len(), remaining, "Cleaned up expired predictions");
        }
        expired.len()
    }

    /// Post a "check the queue" task instead of dispatching inline, so long
    /// backlogs never grow the call stack.
    fn schedule_dispatch(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            inner.dispatch().await;
        });
    }

    /// Claim the oldest queued prediction if the slot is free.
    fn claim_next(self: &Arc<Self>) -> Option<(Prediction, Arc<P>)> {
        let mut state = self.lock_state();
        let processor = state.processor.clone()?;
        if state.in_flight.is_some() {
            return None;
        }

        while let Some(id) = state.queue.front().cloned() {
            let queued = state
                .predictions
                .get(&id)
                .is_some_and(|p| p.status == PredictionStatus::Queued);
            if !queued {
                state.queue.pop_front();
                continue;
            }
            return match self.apply_locked(
                &mut state,
                &id,
                PredictionUpdate::status(PredictionStatus::Processing),
            ) {
                Ok(applied) => Some((applied.prediction, processor)),
                Err(e) => {
                    error!(prediction_id = %id, error = %e, "Failed to start prediction");
                    None
                }
            };
        }
        None
    }

    /// Remember the abort handle of the running processor call. Returns
    /// `false` if the prediction lost its slot in the meantime.
    fn attach_work(&self, id: &str, work: AbortHandle) -> bool {
        let mut state = self.lock_state();
        match state.in_flight.as_mut() {
            Some(in_flight) if in_flight.prediction_id == id => {
                in_flight.work = Some(work);
                true
            }
            _ => false,
        }
    }

    async fn dispatch(self: Arc<Self>) {
        let Some((prediction, processor)) = self.claim_next() else {
            return;
        };
        let id = prediction.id.clone();
        info!(prediction_id = %id, "Prediction processing");

        let work = self
            .runtime
            .spawn(async move { processor.process(prediction).await });
        let abort = work.abort_handle();
        if !self.attach_work(&id, abort.clone()) {
            abort.abort();
        }

        let timeout = self.config.prediction_timeout;
        let store = Arc::downgrade(&self);
        drop(self);

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(joined) => Outcome::from_join(joined),
                Err(_) => {
                    abort.abort();
                    Outcome::TimedOut(limit)
                }
            },
            None => Outcome::from_join(work.await),
        };

        if let Some(inner) = store.upgrade() {
            inner.settle(&id, outcome);
        }
    }

    fn settle(self: &Arc<Self>, id: &str, outcome: Outcome) {
        let settled = match outcome {
            Outcome::Finished(Ok(result)) => {
                let update = PredictionUpdate {
                    status: Some(PredictionStatus::Completed),
                    result: Some(result),
                    ..Default::default()
                };
                self.transition(id, update).map(|_| {
                    info!(prediction_id = %id, "Prediction completed");
                })
            }
            Outcome::Finished(Err(err)) => {
                self.fail(id, PredictionError::classify(&err))
            }
            Outcome::Panicked(message) => self.fail(
                id,
                PredictionError::unknown(format!("Processor panicked: {}", message)),
            ),
            Outcome::TimedOut(limit) => self.fail(id, PredictionError::timeout(limit.as_millis())),
            Outcome::Aborted => {
                debug!(prediction_id = %id, "Processor call aborted");
                Ok(())
            }
        };

        if let Err(e) = settled {
            // The prediction was deleted, disposed or finished by hand meanwhile.
            debug!(prediction_id = %id, error = %e, "Dropping processor outcome");
        }
    }

    fn fail(self: &Arc<Self>, id: &str, error: PredictionError) -> Result<()> {
        warn!(
            prediction_id = %id,
            code = %error.code,
            retryable = error.retryable,
            "Prediction failed: {}",
            error.message
        );
        let update = PredictionUpdate {
            status: Some(PredictionStatus::Failed),
            error: Some(error),
            ..Default::default()
        };
        self.transition(id, update).map(|_| ())
    }
}

impl Outcome {
    fn from_join(joined: std::result::Result<anyhow::Result<serde_json::Value>, JoinError>) -> Self {
        match joined {
            Ok(result) => Outcome::Finished(result),
            Err(e) if e.is_panic() => Outcome::Panicked(panic_message(e.into_panic())),
            Err(_) => Outcome::Aborted,
        }
    }
}

/// Stop the prediction's progress timer and free the slot if it holds it.
/// Returns whether the slot was freed.
fn release_locked<P>(state: &mut StoreState<P>, id: &str) -> bool {
    if let Some(simulator) = state.simulators.remove(id) {
        simulator.stop();
    }
    let holds_slot = state
        .in_flight
        .as_ref()
        .is_some_and(|in_flight| in_flight.prediction_id == id);
    if !holds_slot {
        return false;
    }
    if let Some(work) = state.in_flight.take().and_then(|in_flight| in_flight.work) {
        work.abort();
    }
    true
}

fn sorted_by_creation<'a>(predictions: impl Iterator<Item = &'a Prediction>) -> Vec<Prediction> {
    let mut list: Vec<Prediction> = predictions.cloned().collect();
    list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    list
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        error!("Prediction store mutex poisoned, recovering");
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopProcessor;

    impl Processor for NoopProcessor {
        async fn process(&self, _prediction: Prediction) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    fn make_store() -> PredictionStore<NoopProcessor> {
        PredictionStore::new(StoreConfig::builder().with_auto_cleanup(false).build())
    }

    fn make_prediction(store: &PredictionStore<NoopProcessor>) -> String {
        store
            .create(
                PredictionRequest::new("test"),
                PredictionType::Generate,
                None,
            )
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_mark_processing_sets_started_once() {
        let store = make_store();
        let id = make_prediction(&store);

        let first = store.mark_processing(&id).unwrap();
        assert_eq!(first.status, PredictionStatus::Processing);
        let started_at = first.started_at.unwrap();

        let again = store.mark_processing(&id).unwrap();
        assert_eq!(again.started_at, Some(started_at));
        assert!(store.get_next_queued().is_none());
    }

    #[tokio::test]
    async fn test_second_mark_processing_is_busy() {
        let store = make_store();
        let a = make_prediction(&store);
        let b = make_prediction(&store);

        store.mark_processing(&a).unwrap();
        assert_eq!(
            store.mark_processing(&b).unwrap_err(),
            StoreError::ProcessorBusy(a.clone())
        );

        store.mark_completed(&a, serde_json::json!("ok")).unwrap();
        assert!(store.mark_processing(&b).is_ok());
    }

    #[tokio::test]
    async fn test_invalid_transitions_rejected() {
        let store = make_store();
        let id = make_prediction(&store);

        let err = store
            .mark_completed(&id, serde_json::Value::Null)
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: PredictionStatus::Queued,
                to: PredictionStatus::Completed,
                ..
            }
        ));

        store.mark_processing(&id).unwrap();
        assert!(store
            .update(&id, PredictionUpdate::status(PredictionStatus::Queued))
            .is_err());
    }

    #[tokio::test]
    async fn test_terminal_predictions_are_frozen() {
        let store = make_store();
        let id = make_prediction(&store);
        store.mark_processing(&id).unwrap();

        let done = store.mark_completed(&id, serde_json::json!({"n": 1})).unwrap();
        assert_eq!(done.progress, 100);
        assert_eq!(done.eta_seconds, Some(0));

        // Repeating the same transition is a no-op.
        let repeat = store.mark_completed(&id, serde_json::json!({"n": 2})).unwrap();
        assert_eq!(repeat, done);

        // Field-only updates are ignored.
        let ignored = store.update(&id, PredictionUpdate::progress(10)).unwrap();
        assert_eq!(ignored, done);

        assert!(store
            .mark_failed(&id, PredictionError::processing("late"))
            .is_err());
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let store = make_store();
        let id = make_prediction(&store);
        store.mark_processing(&id).unwrap();

        store.update(&id, PredictionUpdate::progress(40)).unwrap();
        let after = store.update(&id, PredictionUpdate::progress(20)).unwrap();
        assert_eq!(after.progress, 40);

        let capped = store.update(&id, PredictionUpdate::progress(250)).unwrap();
        assert_eq!(capped.progress, 100);
        assert_eq!(capped.status, PredictionStatus::Processing);
    }

    #[tokio::test]
    async fn test_result_only_kept_on_completion() {
        let store = make_store();
        let id = make_prediction(&store);
        store.mark_processing(&id).unwrap();

        let processing = store
            .update(
                &id,
                PredictionUpdate {
                    result: Some(serde_json::json!("early")),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(processing.result.is_none());

        let failed = store
            .mark_failed(&id, PredictionError::new("BAD_PROMPT", "rejected", false))
            .unwrap();
        assert_eq!(failed.error.unwrap().code, "BAD_PROMPT");
        assert!(failed.result.is_none());
        assert!(failed.eta_seconds.is_none());
        assert!(failed.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_delete_in_flight_frees_slot() {
        let store = make_store();
        let a = make_prediction(&store);
        let b = make_prediction(&store);
        store.mark_processing(&a).unwrap();

        assert!(store.delete(&a));
        assert!(store.mark_processing(&b).is_ok());
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let store = make_store();
        let missing = StoreError::NotFound("nope".to_string());
        assert_eq!(store.mark_processing("nope").unwrap_err(), missing);
        assert_eq!(
            store.update("nope", PredictionUpdate::default()).unwrap_err(),
            missing
        );
    }
}
