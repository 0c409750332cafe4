//! Admission queue and concurrency gate.
//!
//! The engine keeps both inside one [`Dispatch`] behind a single mutex so
//! that taking a slot and dequeueing happen in the same critical section.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// FIFO backlog of job ids waiting for a free slot.
#[derive(Debug, Default)]
pub struct AdmissionQueue {
    ids: VecDeque<String>,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job id to the back of the queue.
    pub fn enqueue(&mut self, id: impl Into<String>) {
        self.ids.push_back(id.into());
    }

    /// Take the oldest job id.
    pub fn dequeue(&mut self) -> Option<String> {
        self.ids.pop_front()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Bounds the number of simultaneously running jobs.
///
/// A slot is an owned semaphore permit; dropping the permit frees the slot.
#[derive(Debug)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    max: usize,
}

impl ConcurrencyGate {
    pub fn new(max: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Take a slot if one is free.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore).try_acquire_owned().ok()
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.max - self.available()
    }
}

/// Queue and gate, mutated together.
#[derive(Debug)]
pub struct Dispatch {
    pub queue: AdmissionQueue,
    pub gate: ConcurrencyGate,
}

impl Dispatch {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            queue: AdmissionQueue::new(),
            gate: ConcurrencyGate::new(max_concurrent),
        }
    }

    /// Dequeue the next job id if, and only if, a slot could be acquired for it.
    pub fn admit_next(&mut self) -> Option<(String, OwnedSemaphorePermit)> {
        if self.queue.is_empty() {
            return None;
        }
        let permit = self.gate.try_acquire()?;
        let id = self.queue.dequeue()?;
        Some((id, permit))
    }

    /// Nothing waiting and nothing running.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.gate.in_use() == 0
    }
}
