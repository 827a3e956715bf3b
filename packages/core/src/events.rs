//! Lifecycle events published by the job tracker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobState};

/// Events emitted while a run is being tracked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A job was recorded as Pending.
    JobRegistered {
        job_id: JobId,
        job_name: String,
        timestamp: DateTime<Utc>,
    },
    /// The remote service accepted a job.
    JobSubmitted {
        job_id: JobId,
        remote_job_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A job's state changed.
    JobStateChanged {
        job_id: JobId,
        old_state: JobState,
        new_state: JobState,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// A remote call for a job failed transiently.
    RemoteCallFailed {
        job_id: JobId,
        attempt: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// A remote cancel was sent for a job.
    CancelIssued {
        job_id: JobId,
        remote_job_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A remote cancel did not go through.
    CancelFailed {
        job_id: JobId,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::JobRegistered { timestamp, .. }
            | JobEvent::JobSubmitted { timestamp, .. }
            | JobEvent::JobStateChanged { timestamp, .. }
            | JobEvent::RemoteCallFailed { timestamp, .. }
            | JobEvent::CancelIssued { timestamp, .. }
            | JobEvent::CancelFailed { timestamp, .. } => *timestamp,
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::JobRegistered { job_id, .. }
            | JobEvent::JobSubmitted { job_id, .. }
            | JobEvent::JobStateChanged { job_id, .. }
            | JobEvent::RemoteCallFailed { job_id, .. }
            | JobEvent::CancelIssued { job_id, .. }
            | JobEvent::CancelFailed { job_id, .. } => *job_id,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::JobRegistered {
                job_id, job_name, ..
            } => format!("Job {} registered as {}", job_id, job_name),
            JobEvent::JobSubmitted {
                job_id,
                remote_job_id,
                ..
            } => format!("Job {} submitted as {}", job_id, remote_job_id),
            JobEvent::JobStateChanged {
                job_id,
                old_state,
                new_state,
                reason,
                ..
            } => match reason {
                Some(reason) => format!("Job {} {} -> {}: {}", job_id, old_state, new_state, reason),
                None => format!("Job {} {} -> {}", job_id, old_state, new_state),
            },
            JobEvent::RemoteCallFailed {
                job_id,
                attempt,
                error,
                ..
            } => format!("Job {} remote call failed (attempt {}): {}", job_id, attempt, error),
            JobEvent::CancelIssued {
                job_id,
                remote_job_id,
                ..
            } => format!("Job {} cancel sent for {}", job_id, remote_job_id),
            JobEvent::CancelFailed { job_id, error, .. } => {
                format!("Job {} cancel failed: {}", job_id, error)
            }
        }
    }
}
