//! Handler capability: the work a job actually performs.

use std::future::Future;

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::worker::state::Job;

/// Processing function injected into the engine.
///
/// Each kind of worker (archival snapshot, README enhancement, duplicate
/// scan, ...) is its own implementation. The engine passes a read-only
/// snapshot of the running job; only the engine writes back the outcome.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<serde_json::Value, HandlerError>;
}

/// Adapter turning an async closure into a [`JobHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Build a handler from `Fn(Job) -> impl Future<Output = Result<Value, HandlerError>>`.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send + 'static,
{
    async fn handle(&self, job: &Job) -> Result<serde_json::Value, HandlerError> {
        (self.f)(job.clone()).await
    }
}
