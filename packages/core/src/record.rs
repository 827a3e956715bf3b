//! Job state machine and the persisted per-job record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobDescriptor, JobId};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created, not yet accepted by the remote service.
    #[default]
    Pending,
    /// Accepted by the remote service, waiting for compute.
    Submitted,
    /// Executing remotely.
    Running,
    Succeeded,
    Failed,
    /// Exceeded its own time budget or the run's global timeout.
    TimedOut,
    Cancelled,
}

impl JobState {
    pub const ALL: [JobState; 7] = [
        JobState::Pending,
        JobState::Submitted,
        JobState::Running,
        JobState::Succeeded,
        JobState::Failed,
        JobState::TimedOut,
        JobState::Cancelled,
    ];

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::TimedOut | JobState::Cancelled
        )
    }

    /// Whether the remote service currently holds this job.
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Submitted | JobState::Running)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match self {
            Pending => matches!(next, Submitted | Failed | TimedOut | Cancelled),
            Submitted => matches!(next, Running | Succeeded | Failed | TimedOut | Cancelled),
            Running => matches!(next, Succeeded | Failed | TimedOut | Cancelled),
            Succeeded | Failed | TimedOut | Cancelled => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Submitted => "submitted",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed_out",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("job {job_id}: illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub job_id: JobId,
    pub from: JobState,
    pub to: JobState,
}

/// Persisted tracking row for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub descriptor: JobDescriptor,
    pub state: JobState,
    #[serde(default)]
    pub remote_job_id: Option<String>,
    #[serde(default)]
    pub last_poll_at: Option<DateTime<Utc>>,
    /// Consecutive transient failures since the last successful call.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub cancel_issued: bool,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a Pending record for a freshly generated descriptor.
    pub fn pending(descriptor: JobDescriptor) -> Self {
        Self {
            descriptor,
            state: JobState::Pending,
            remote_job_id: None,
            last_poll_at: None,
            retry_count: 0,
            submitted_at: None,
            started_at: None,
            finished_at: None,
            reason: None,
            cancel_issued: false,
            updated_at: Utc::now(),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.descriptor.id()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to `next`, stamping the lifecycle timestamps.
    ///
    /// A no-op when already in `next`.
    pub fn transition(
        &mut self,
        next: JobState,
        reason: Option<String>,
    ) -> Result<(), TransitionError> {
        if self.state == next {
            return Ok(());
        }
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                job_id: self.job_id(),
                from: self.state,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            JobState::Submitted => self.submitted_at = Some(now),
            JobState::Running => self.started_at = Some(now),
            s if s.is_terminal() => self.finished_at = Some(now),
            _ => {}
        }
        if reason.is_some() {
            self.reason = reason;
        }
        self.state = next;
        self.updated_at = now;
        Ok(())
    }

    /// Seconds spent Running so far, if the job ever started.
    pub fn running_for(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.started_at.map(|started| now - started)
    }

    /// Whether the job has used up its own time budget.
    pub fn over_budget(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Running
            && self.running_for(now).is_some_and(|elapsed| {
                let budget = i64::try_from(self.descriptor.resources().timeout_secs)
                    .unwrap_or(i64::MAX);
                elapsed.num_seconds() >= budget
            })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use crate::{InputRef, ReaderName, ResourceSpec};

    fn record() -> JobRecord {
        JobRecord::pending(JobDescriptor::new(
            "run",
            "run_0_reach",
            ReaderName::Reach,
            InputRef::Object { key: "k".into() },
            ResourceSpec::default(),
        ))
    }

    #[test]
    fn terminal_states_never_move() {
        for from in JobState::ALL.into_iter().filter(JobState::is_terminal) {
            for to in JobState::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn nothing_returns_to_pending() {
        for from in JobState::ALL {
            assert!(!from.can_transition_to(JobState::Pending));
        }
    }

    #[test]
    fn full_lifecycle_stamps_times() {
        let mut rec = record();
        rec.transition(JobState::Submitted, None).unwrap();
        rec.transition(JobState::Running, None).unwrap();
        rec.transition(JobState::Succeeded, None).unwrap();
        assert!(rec.submitted_at.is_some());
        assert!(rec.started_at.is_some());
        assert!(rec.finished_at.is_some());
        assert!(rec.is_terminal());
    }

    #[test]
    fn rejects_terminal_to_running() {
        let mut rec = record();
        rec.transition(JobState::Cancelled, Some("operator".into()))
            .unwrap();
        let err = rec.transition(JobState::Running, None).unwrap_err();
        assert_eq!(err.from, JobState::Cancelled);
        assert_eq!(rec.state, JobState::Cancelled);
        assert_eq!(rec.reason.as_deref(), Some("operator"));
    }

    #[test]
    fn same_state_is_a_no_op() {
        let mut rec = record();
        rec.transition(JobState::Submitted, None).unwrap();
        let stamped = rec.submitted_at;
        rec.transition(JobState::Submitted, None).unwrap();
        assert_eq!(rec.submitted_at, stamped);
    }

    #[test]
    fn budget_only_applies_while_running() {
        let mut rec = record();
        let later = Utc::now() + chrono::Duration::days(2);
        assert!(!rec.over_budget(later));
        rec.transition(JobState::Submitted, None).unwrap();
        rec.transition(JobState::Running, None).unwrap();
        assert!(rec.over_budget(later));
        assert!(!rec.over_budget(Utc::now()));
    }

    #[test]
    fn huge_budget_never_expires() {
        let mut rec = JobRecord::pending(JobDescriptor::new(
            "run",
            "run_0_reach",
            ReaderName::Reach,
            InputRef::Object { key: "k".into() },
            ResourceSpec {
                timeout_secs: u64::MAX,
                ..ResourceSpec::default()
            },
        ));
        rec.transition(JobState::Submitted, None).unwrap();
        rec.transition(JobState::Running, None).unwrap();
        assert!(!rec.over_budget(Utc::now() + chrono::Duration::days(3650)));
    }
}
