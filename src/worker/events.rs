//! Lifecycle events and their delivery to observers.
//!
//! Two delivery paths exist side by side:
//! - synchronous listeners registered with [`EventNotifier::on`], called in
//!   registration order at the moment of the transition
//! - a broadcast channel for async consumers ([`EventNotifier::subscribe`])

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::worker::state::Job;

/// The fixed set of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Started,
    Completed,
    Failed,
}

impl EventKind {
    /// Wire name, e.g. `job:created`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "job:created",
            Self::Started => "job:started",
            Self::Completed => "job:completed",
            Self::Failed => "job:failed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle transition, carrying the job snapshot taken right after it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Created { job: Job },
    Started { job: Job },
    Completed { job: Job },
    Failed { job: Job },
}

impl JobEvent {
    pub fn new(kind: EventKind, job: Job) -> Self {
        match kind {
            EventKind::Created => Self::Created { job },
            EventKind::Started => Self::Started { job },
            EventKind::Completed => Self::Completed { job },
            EventKind::Failed => Self::Failed { job },
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Created { .. } => EventKind::Created,
            Self::Started { .. } => EventKind::Started,
            Self::Completed { .. } => EventKind::Completed,
            Self::Failed { .. } => EventKind::Failed,
        }
    }

    pub fn job(&self) -> &Job {
        match self {
            Self::Created { job }
            | Self::Started { job }
            | Self::Completed { job }
            | Self::Failed { job } => job,
        }
    }

    /// Whether this is a terminal event (completed or failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Synchronous observer callback.
pub type Listener = Arc<dyn Fn(&JobEvent) + Send + Sync>;

/// Publishes lifecycle events to registered listeners and broadcast subscribers.
pub struct EventNotifier {
    listeners: RwLock<HashMap<EventKind, Vec<Listener>>>,
    tx: broadcast::Sender<JobEvent>,
}

impl EventNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            listeners: RwLock::new(HashMap::new()),
            tx,
        }
    }

    /// Register a listener for one event kind.
    pub fn on<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(Arc::new(listener));
    }

    /// Subscribe to every event. Slow receivers lag rather than block the engine.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    /// Deliver an event to all listeners, then broadcast it.
    ///
    /// A panicking listener is logged and skipped; the remaining listeners
    /// still run.
    pub fn emit(&self, event: JobEvent) {
        let kind = event.kind();
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        for (index, listener) in listeners.iter().enumerate() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                warn!(
                    event = %kind,
                    job_id = %event.job().id,
                    listener = index,
                    reason = panic_message(panic.as_ref()),
                    "Event listener panicked"
                );
            }
        }

        // Ok if nobody is subscribed.
        let _ = self.tx.send(event);
    }

    /// Number of listeners registered for a kind.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
