//! Job record and lifecycle state machine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HandlerError, JobError};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Record exists but has not entered the admission queue.
    Created,
    /// Waiting for a free execution slot.
    Queued,
    /// Handler is executing.
    Running,
    /// Handler returned a result.
    Completed,
    /// Handler reported a failure.
    Failed,
}

impl JobState {
    /// Check if this state allows transitioning to another state.
    ///
    /// Transitions only move forward and never skip a state.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;

        matches!(
            (self, target),
            (Created, Queued) | (Queued, Running) | (Running, Completed) | (Running, Failed)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A state transition event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state.
    pub from: JobState,
    /// New state.
    pub to: JobState,
    /// When the transition occurred.
    pub timestamp: DateTime<Utc>,
}

/// One unit of submitted work.
///
/// Records are owned by the [`JobStore`](crate::worker::JobStore); everything
/// handed out of the engine is a cloned snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Caller-supplied identifier, unique per engine.
    pub id: String,
    /// Opaque payload passed verbatim to the handler.
    pub data: serde_json::Value,
    /// Current state.
    pub state: JobState,
    /// Handler output, set only once the job is completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Handler failure, set only once the job has failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<HandlerError>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the handler was invoked.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// State transition history.
    pub transitions: Vec<StateTransition>,
}

impl Job {
    /// Create a new job record in the `Created` state.
    pub fn new(id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            data,
            state: JobState::Created,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            transitions: Vec::new(),
        }
    }

    /// Transition to a new state.
    pub(crate) fn transition_to(&mut self, new_state: JobState) -> Result<(), JobError> {
        if !self.state.can_transition_to(new_state) {
            return Err(JobError::InvalidTransition {
                id: self.id.clone(),
                state: self.state.to_string(),
                target: new_state.to_string(),
            });
        }

        let now = Utc::now();
        self.transitions.push(StateTransition {
            from: self.state,
            to: new_state,
            timestamp: now,
        });
        self.state = new_state;

        match new_state {
            JobState::Running => self.started_at = Some(now),
            JobState::Completed | JobState::Failed => self.finished_at = Some(now),
            JobState::Created | JobState::Queued => {}
        }

        Ok(())
    }

    /// Record the handler's result and mark the job completed.
    pub(crate) fn complete(&mut self, result: serde_json::Value) -> Result<(), JobError> {
        self.transition_to(JobState::Completed)?;
        self.result = Some(result);
        Ok(())
    }

    /// Record the handler's failure and mark the job failed.
    pub(crate) fn fail(&mut self, error: HandlerError) -> Result<(), JobError> {
        self.transition_to(JobState::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    /// Time spent running: from start to finish, or to now if still running.
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|start| {
            let end = self.finished_at.unwrap_or_else(Utc::now);
            end.signed_duration_since(start)
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_valid() {
        assert!(JobState::Created.can_transition_to(JobState::Queued));
        assert!(JobState::Queued.can_transition_to(JobState::Running));
        assert!(JobState::Running.can_transition_to(JobState::Completed));
        assert!(JobState::Running.can_transition_to(JobState::Failed));
    }

    #[test]
    fn state_transitions_invalid() {
        assert!(!JobState::Created.can_transition_to(JobState::Running));
        assert!(!JobState::Queued.can_transition_to(JobState::Completed));
        assert!(!JobState::Completed.can_transition_to(JobState::Failed));
        assert!(!JobState::Failed.can_transition_to(JobState::Running));
        assert!(!JobState::Running.can_transition_to(JobState::Queued));
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Created.is_terminal());
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }

    #[test]
    fn lifecycle_sets_timestamps_once() {
        let mut job = Job::new("scan-1", serde_json::json!({"repo": "dotfiles"}));
        assert_eq!(job.state, JobState::Created);
        assert!(job.started_at.is_none());

        job.transition_to(JobState::Queued).unwrap();
        assert!(job.started_at.is_none());

        job.transition_to(JobState::Running).unwrap();
        let started = job.started_at;
        assert!(started.is_some());

        job.complete(serde_json::json!({"duplicates": 3})).unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.started_at, started);
        assert!(job.finished_at.is_some());
        assert_eq!(job.result, Some(serde_json::json!({"duplicates": 3})));
        assert!(job.error.is_none());
        assert_eq!(job.transitions.len(), 3);
    }

    #[test]
    fn fail_records_error() {
        let mut job = Job::new("readme-1", serde_json::Value::Null);
        job.transition_to(JobState::Queued).unwrap();
        job.transition_to(JobState::Running).unwrap();
        job.fail(HandlerError::new("bad input")).unwrap();

        assert_eq!(job.state, JobState::Failed);
        assert!(job.result.is_none());
        assert_eq!(job.error.as_ref().map(|e| e.message.as_str()), Some("bad input"));
    }

    #[test]
    fn terminal_state_is_never_left() {
        let mut job = Job::new("a", serde_json::Value::Null);
        job.transition_to(JobState::Queued).unwrap();
        job.transition_to(JobState::Running).unwrap();
        job.complete(serde_json::Value::Null).unwrap();

        let err = job.fail(HandlerError::new("late")).unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));
        assert_eq!(job.state, JobState::Completed);
        assert!(job.error.is_none());
    }

    #[test]
    fn skipping_queue_is_rejected() {
        let mut job = Job::new("a", serde_json::Value::Null);
        assert!(job.transition_to(JobState::Running).is_err());
        assert!(job.transitions.is_empty());
    }

    #[test]
    fn elapsed_requires_start() {
        let mut job = Job::new("a", serde_json::Value::Null);
        assert!(job.elapsed().is_none());
        job.transition_to(JobState::Queued).unwrap();
        job.transition_to(JobState::Running).unwrap();
        assert!(job.elapsed().is_some());
    }

    #[test]
    fn job_state_display() {
        assert_eq!(JobState::Running.to_string(), "running");
        assert_eq!(JobState::Completed.to_string(), "completed");
    }

    #[test]
    fn job_state_serde() {
        let json = serde_json::to_string(&JobState::Queued).unwrap();
        assert_eq!(json, "\"queued\"");
    }
}
