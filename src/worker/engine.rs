//! Execution engine: admission, bounded dispatch and lifecycle transitions.
//!
//! The engine is the only writer of job records. Its flow:
//! - `submit()` creates the record, emits `job:created`, queues it and drains
//! - draining admits queued jobs while the gate has capacity, marks them
//!   running and spawns the handler on its own task
//! - when a handler returns (or panics, or times out) the job is finished,
//!   its slot released and the queue drained again

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{ConfigError, HandlerError, JobError};
use crate::worker::events::{EventKind, EventNotifier, JobEvent};
use crate::worker::queue::Dispatch;
use crate::worker::state::{Job, JobState};
use crate::worker::stats::EngineStats;
use crate::worker::store::JobStore;
use crate::worker::task::JobHandler;

struct Inner {
    config: EngineConfig,
    handler: Arc<dyn JobHandler>,
    store: JobStore,
    /// Admission queue + concurrency gate, always locked before the store.
    dispatch: Mutex<Dispatch>,
    events: EventNotifier,
    /// Signalled whenever the queue is empty and nothing is running.
    idle: Notify,
}

/// Single-process job queue with a bounded worker pool.
///
/// Cheap to clone; clones share the same store, queue and observers.
#[derive(Clone)]
pub struct JobEngine {
    inner: Arc<Inner>,
}

impl JobEngine {
    /// Create an engine. Fails if the configuration is unusable.
    pub fn new(config: EngineConfig, handler: Arc<dyn JobHandler>) -> Result<Self, ConfigError> {
        config.validate()?;

        info!(
            engine = %config.name,
            max_concurrent = config.max_concurrent,
            job_timeout = ?config.job_timeout,
            "Job engine ready"
        );

        let events = EventNotifier::new(config.event_capacity);
        let dispatch = Mutex::new(Dispatch::new(config.max_concurrent));

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                handler,
                store: JobStore::new(),
                dispatch,
                events,
                idle: Notify::new(),
            }),
        })
    }

    pub fn builder() -> JobEngineBuilder {
        JobEngineBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.config.max_concurrent
    }

    /// Register a synchronous listener for one lifecycle event.
    pub fn on<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, listener);
    }

    /// Subscribe to all lifecycle events on a broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// All lifecycle events as a stream.
    pub fn event_stream(&self) -> BroadcastStream<JobEvent> {
        BroadcastStream::new(self.inner.events.subscribe())
    }

    /// Submit a unit of work.
    ///
    /// Returns the record as it stood once queued; the handler runs on its
    /// own task. A duplicate id is rejected and leaves the store untouched.
    pub async fn submit(
        &self,
        id: impl Into<String>,
        data: serde_json::Value,
    ) -> Result<Job, JobError> {
        let id = id.into();
        let inner = &self.inner;

        let created = match inner.store.create(&id, data).await {
            Ok(job) => job,
            Err(e) => {
                warn!(engine = %inner.config.name, job_id = %id, "Rejected job submission: {}", e);
                return Err(e);
            }
        };

        info!(engine = %inner.config.name, job_id = %id, "Job submitted");
        inner.events.emit(JobEvent::new(EventKind::Created, created));

        let mut dispatch = inner.dispatch.lock().await;
        let queued = inner.store.transition(&id, JobState::Queued).await?;
        dispatch.queue.enqueue(id);
        Inner::drain(inner, &mut dispatch).await;

        Ok(queued)
    }

    /// Get a job snapshot by id.
    pub async fn get_job(&self, id: &str) -> Option<Job> {
        self.inner.store.get(id).await
    }

    /// Every job submitted so far, in submission order.
    pub async fn all_jobs(&self) -> Vec<Job> {
        self.inner.store.all().await
    }

    /// Counters derived from the current store contents.
    pub async fn stats(&self) -> EngineStats {
        EngineStats::from_summary(&self.inner.store.summary().await)
    }

    /// Nothing queued and nothing running.
    pub async fn is_idle(&self) -> bool {
        self.inner.dispatch.lock().await.is_idle()
    }

    /// Wait until the queue is drained and every running job has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.is_idle().await {
                return;
            }
            notified.await;
        }
    }
}

impl Inner {
    /// Start queued jobs while slots are free.
    ///
    /// Called with the dispatch lock held, from `submit` and from job
    /// completion, so admission is serialized and FIFO.
    async fn drain(this: &Arc<Self>, dispatch: &mut Dispatch) {
        while let Some((id, permit)) = dispatch.admit_next() {
            match this.store.transition(&id, JobState::Running).await {
                Ok(job) => {
                    debug!(
                        engine = %this.config.name,
                        job_id = %id,
                        running = dispatch.gate.in_use(),
                        queued = dispatch.queue.len(),
                        "Job started"
                    );
                    this.events.emit(JobEvent::new(EventKind::Started, job.clone()));
                    tokio::spawn(Arc::clone(this).run(job, permit));
                }
                Err(e) => {
                    error!(job_id = %id, "Failed to start job: {}", e);
                }
            }
        }

        if dispatch.is_idle() {
            this.idle.notify_waiters();
        }
    }

    /// Invoke the handler for one running job and record the outcome.
    ///
    /// The permit holds the job's slot until `finish` drops it. Boxed because
    /// it closes the drain → run → finish → drain cycle.
    fn run(self: Arc<Self>, job: Job, permit: OwnedSemaphorePermit) -> BoxFuture<'static, ()> {
        async move {
            let id = job.id.clone();
            let handler = Arc::clone(&self.handler);
            let limit = self.config.job_timeout;

            // Separate task so a panicking handler surfaces as a JoinError.
            let task = tokio::spawn(async move {
                match limit {
                    Some(limit) => tokio::time::timeout(limit, handler.handle(&job))
                        .await
                        .unwrap_or_else(|_| Err(HandlerError::timed_out(limit))),
                    None => handler.handle(&job).await,
                }
            });

            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(HandlerError::panicked(e)),
            };

            self.finish(&id, outcome, permit).await;
        }
        .boxed()
    }

    /// Move a job to its terminal state, notify observers, free its slot.
    async fn finish(
        self: &Arc<Self>,
        id: &str,
        outcome: Result<serde_json::Value, HandlerError>,
        permit: OwnedSemaphorePermit,
    ) {
        let (kind, update) = match outcome {
            Ok(result) => (
                EventKind::Completed,
                self.store.update(id, |job| job.complete(result)).await,
            ),
            Err(failure) => (
                EventKind::Failed,
                self.store.update(id, |job| job.fail(failure)).await,
            ),
        };

        match update {
            Ok(job) => {
                let elapsed_ms = job.elapsed().map(|d| d.as_millis() as u64);
                if let Some(failure) = &job.error {
                    warn!(
                        engine = %self.config.name,
                        job_id = %id,
                        elapsed_ms,
                        cause = failure.cause.as_deref(),
                        "Job failed: {}",
                        failure.message
                    );
                } else {
                    info!(engine = %self.config.name, job_id = %id, elapsed_ms, "Job completed");
                }
                self.events.emit(JobEvent::new(kind, job));
            }
            Err(e) => {
                error!(job_id = %id, "Failed to record job outcome: {}", e);
            }
        }

        drop(permit);
        let mut dispatch = self.dispatch.lock().await;
        Self::drain(self, &mut dispatch).await;
    }
}

/// Builder for [`JobEngine`].
///
/// `max_concurrent` overrides the limit of whichever config is supplied,
/// regardless of call order.
#[derive(Default)]
pub struct JobEngineBuilder {
    config: Option<EngineConfig>,
    max_concurrent: Option<usize>,
    handler: Option<Arc<dyn JobHandler>>,
}

impl JobEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = Some(max_concurrent);
        self
    }

    pub fn handler(mut self, handler: impl JobHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<JobEngine, ConfigError> {
        let handler = self.handler.ok_or_else(|| ConfigError::MissingRequired {
            key: "handler".to_string(),
            hint: "Provide a JobHandler before building the engine.".to_string(),
        })?;

        let mut config = self.config.unwrap_or_default();
        if let Some(max_concurrent) = self.max_concurrent {
            config = config.with_max_concurrent(max_concurrent);
        }
        JobEngine::new(config, handler)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::worker::task::handler_fn;

    fn echo_engine(max: usize) -> JobEngine {
        JobEngine::builder()
            .max_concurrent(max)
            .handler(handler_fn(|job: Job| async move { Ok::<_, HandlerError>(job.data) }))
            .build()
            .unwrap()
    }

    #[test]
    fn builder_requires_handler() {
        let result = JobEngine::builder().build();
        assert!(matches!(
            result,
            Err(ConfigError::MissingRequired { ref key, .. }) if key == "handler"
        ));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let result = JobEngine::builder()
            .max_concurrent(0)
            .handler(handler_fn(|_job: Job| async { Ok::<_, HandlerError>(serde_json::Value::Null) }))
            .build();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn builder_limit_survives_later_config() {
        let config = EngineConfig {
            name: "nightly".to_string(),
            ..EngineConfig::default()
        };
        let engine = JobEngine::builder()
            .max_concurrent(7)
            .config(config)
            .handler(handler_fn(|job: Job| async move { Ok::<_, HandlerError>(job.data) }))
            .build()
            .unwrap();

        assert_eq!(engine.max_concurrent(), 7);
        assert_eq!(engine.name(), "nightly");
    }

    #[tokio::test]
    async fn submit_runs_to_completion() {
        let engine = echo_engine(2);
        let job = engine.submit("a", serde_json::json!({"x": 1})).await.unwrap();
        assert_eq!(job.id, "a");
        assert_eq!(job.state, JobState::Queued);

        tokio::time::timeout(Duration::from_secs(5), engine.wait_idle())
            .await
            .unwrap();

        let done = engine.get_job("a").await.unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.result, Some(serde_json::json!({"x": 1})));
        assert!(done.started_at.is_some());
        assert!(done.finished_at.is_some());
    }

    #[tokio::test]
    async fn duplicate_submission_is_rejected() {
        let engine = echo_engine(1);
        engine.submit("a", serde_json::json!(1)).await.unwrap();

        let err = engine.submit("a", serde_json::json!(2)).await.unwrap_err();
        assert!(matches!(err, JobError::Duplicate { .. }));

        tokio::time::timeout(Duration::from_secs(5), engine.wait_idle())
            .await
            .unwrap();
        assert_eq!(engine.all_jobs().await.len(), 1);
        assert_eq!(engine.stats().await.created, 1);
        assert_eq!(
            engine.get_job("a").await.unwrap().result,
            Some(serde_json::json!(1))
        );
    }

    #[tokio::test]
    async fn slots_are_returned_after_failures_and_panics() {
        let engine = JobEngine::builder()
            .max_concurrent(2)
            .handler(handler_fn(|job: Job| async move {
                match job.data.as_str() {
                    Some("panic") => panic!("handler blew up"),
                    Some("fail") => Err(HandlerError::new("bad input")),
                    _ => Ok(job.data),
                }
            }))
            .build()
            .unwrap();

        for (id, data) in [("a", "panic"), ("b", "fail"), ("c", "ok"), ("d", "panic")] {
            engine.submit(id, serde_json::json!(data)).await.unwrap();
        }
        tokio::time::timeout(Duration::from_secs(5), engine.wait_idle())
            .await
            .unwrap();

        let dispatch = engine.inner.dispatch.lock().await;
        assert_eq!(dispatch.gate.available(), 2);
        assert_eq!(dispatch.gate.in_use(), 0);
        drop(dispatch);

        let stats = engine.stats().await;
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 3);
    }

    #[tokio::test]
    async fn new_engine_is_idle() {
        let engine = echo_engine(3);
        assert!(engine.is_idle().await);
        assert_eq!(engine.max_concurrent(), 3);
        assert_eq!(engine.name(), "job-engine");
        let stats = engine.stats().await;
        assert_eq!(stats.created, 0);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[tokio::test]
    async fn missing_job_is_none() {
        let engine = echo_engine(1);
        assert!(engine.get_job("ghost").await.is_none());
    }
}
