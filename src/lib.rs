//! In-process job queue with a bounded worker pool.

pub mod config;
pub mod error;
pub mod handlers;
pub mod worker;

pub use config::EngineConfig;
pub use error::{ConfigError, HandlerError, JobError};
pub use worker::{EngineStats, EventKind, Job, JobEngine, JobEvent, JobHandler, JobState, handler_fn};
