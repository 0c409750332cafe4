//! Derived counters over the job store.

use serde::{Deserialize, Serialize};

use crate::worker::store::StoreSummary;

/// Snapshot of engine counters, recomputed from the store on every call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Jobs ever submitted.
    pub created: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    /// `completed / (completed + failed)`, in `[0, 1]`; 0 until a job terminates.
    pub success_rate: f64,
}

impl EngineStats {
    pub fn from_summary(summary: &StoreSummary) -> Self {
        Self {
            created: summary.total,
            queued: summary.queued,
            running: summary.running,
            completed: summary.completed,
            failed: summary.failed,
            success_rate: success_rate(summary.completed, summary.failed),
        }
    }

    /// Jobs that reached a terminal state.
    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }

    /// Success rate as a percentage.
    pub fn success_percent(&self) -> f64 {
        self.success_rate * 100.0
    }
}

impl std::fmt::Display for EngineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "created={} queued={} running={} completed={} failed={} success={:.1}%",
            self.created,
            self.queued,
            self.running,
            self.completed,
            self.failed,
            self.success_percent()
        )
    }
}

fn success_rate(completed: usize, failed: usize) -> f64 {
    let finished = completed + failed;
    if finished == 0 {
        0.0
    } else {
        completed as f64 / finished as f64
    }
}
