//! Run-level outcome types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobState, ReaderName};

/// Post-hoc classification of a job that did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Out-of-memory or similar resource limit in the logs.
    ResourceExhausted,
    /// A reader crash signature in the logs.
    ReaderCrash,
    /// Remote status could not be read within the retry budget.
    PollingExhausted,
    /// The remote service rejected the job outright.
    Permanent,
    Unclassified,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureClass::ResourceExhausted => "resource_exhausted",
            FailureClass::ReaderCrash => "reader_crash",
            FailureClass::PollingExhausted => "polling_exhausted",
            FailureClass::Permanent => "permanent",
            FailureClass::Unclassified => "unclassified",
        };
        f.write_str(s)
    }
}

/// Number of jobs in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateCounts {
    pub pending: u64,
    pub submitted: u64,
    pub running: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
}

impl StateCounts {
    pub fn record(&mut self, state: JobState) {
        *self.slot(state) += 1;
    }

    pub fn get(&self, state: JobState) -> u64 {
        match state {
            JobState::Pending => self.pending,
            JobState::Submitted => self.submitted,
            JobState::Running => self.running,
            JobState::Succeeded => self.succeeded,
            JobState::Failed => self.failed,
            JobState::TimedOut => self.timed_out,
            JobState::Cancelled => self.cancelled,
        }
    }

    pub fn total(&self) -> u64 {
        JobState::ALL.iter().map(|s| self.get(*s)).sum()
    }

    pub fn terminal(&self) -> u64 {
        self.succeeded + self.failed + self.timed_out + self.cancelled
    }

    fn slot(&mut self, state: JobState) -> &mut u64 {
        match state {
            JobState::Pending => &mut self.pending,
            JobState::Submitted => &mut self.submitted,
            JobState::Running => &mut self.running,
            JobState::Succeeded => &mut self.succeeded,
            JobState::Failed => &mut self.failed,
            JobState::TimedOut => &mut self.timed_out,
            JobState::Cancelled => &mut self.cancelled,
        }
    }
}

impl FromIterator<JobState> for StateCounts {
    fn from_iter<I: IntoIterator<Item = JobState>>(iter: I) -> Self {
        let mut counts = StateCounts::default();
        for state in iter {
            counts.record(state);
        }
        counts
    }
}

/// One job that did not end Succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub job_id: JobId,
    pub job_name: String,
    pub reader: ReaderName,
    pub state: JobState,
    pub reason: String,
    pub classification: FailureClass,
}

/// A Succeeded job whose output could not be confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingOutput {
    pub job_id: JobId,
    pub job_name: String,
    pub output_key: String,
    pub reason: String,
}

/// How the run's wait phase ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every job reached a terminal state on its own.
    #[default]
    Completed,
    /// The global timeout fired first.
    TimedOut,
    /// The operator interrupted the run.
    Interrupted,
}

/// Aggregate outcome report for one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub total: u64,
    pub counts: StateCounts,
    #[serde(default)]
    pub failures: Vec<FailureReport>,
    #[serde(default)]
    pub missing_outputs: Vec<MissingOutput>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn new(run_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            outcome: RunOutcome::Completed,
            total: 0,
            counts: StateCounts::default(),
            failures: Vec::new(),
            missing_outputs: Vec::new(),
            started_at,
            finished_at: started_at,
            duration_ms: 0,
        }
    }

    /// Stamp the end time and wall-clock duration.
    pub fn finish(&mut self, finished_at: DateTime<Utc>) {
        self.finished_at = finished_at;
        self.duration_ms = (finished_at - self.started_at).num_milliseconds().max(0) as u64;
    }

    /// True when every job ended Succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.counts.succeeded == self.total
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some((self.counts.succeeded as f64 / self.total as f64) * 100.0)
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    #[test]
    fn counts_sum_to_total() {
        let counts: StateCounts = [
            JobState::Succeeded,
            JobState::Failed,
            JobState::Cancelled,
            JobState::Succeeded,
            JobState::Running,
        ]
        .into_iter()
        .collect();
        assert_eq!(counts.total(), 5);
        assert_eq!(counts.terminal(), 4);
        assert_eq!(counts.get(JobState::Succeeded), 2);
    }

    #[test]
    fn empty_run_has_no_success_rate() {
        let summary = RunSummary::new("r", Utc::now());
        assert!(summary.all_succeeded());
        assert_eq!(summary.success_rate(), None);
    }

    #[test]
    fn finish_never_goes_negative() {
        let now = Utc::now();
        let mut summary = RunSummary::new("r", now);
        summary.finish(now - chrono::Duration::seconds(5));
        assert_eq!(summary.duration_ms, 0);
    }
}
