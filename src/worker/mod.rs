//! Job engine core: admission, bounded execution, lifecycle and events.
//!
//! Core components:
//! - `state` — Job record and state machine (Created → Queued → Running → Completed/Failed)
//! - `store` — JobStore, the append-only id → record ledger
//! - `queue` — FIFO admission queue and concurrency gate
//! - `task` — JobHandler capability injected into the engine
//! - `events` — lifecycle events, listeners and broadcast fan-out
//! - `stats` — counters derived from the store
//! - `engine` — JobEngine, which ties the above together

pub mod engine;
pub mod events;
pub mod queue;
pub mod state;
pub mod stats;
pub mod store;
pub mod task;

pub use engine::{JobEngine, JobEngineBuilder};
pub use events::{EventKind, EventNotifier, JobEvent, Listener};
pub use queue::{AdmissionQueue, ConcurrencyGate};
pub use state::{Job, JobState, StateTransition};
pub use stats::EngineStats;
pub use store::{JobStore, StoreSummary};
pub use task::{FnHandler, JobHandler, handler_fn};
