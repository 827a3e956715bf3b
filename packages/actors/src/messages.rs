//! Message types for actor communication.

use batch::RemoteJobId;
use ractor::RpcReplyPort;
use reading_core::{JobDescriptor, JobId, JobRecord, JobState, StateCounts};
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::task::TaskTracker;

/// Messages for the TrackerActor.
#[derive(Debug)]
pub enum TrackerMessage {
    /// Register a job and start its submission lane.
    Submit {
        descriptor: Box<JobDescriptor>,
        reply: RpcReplyPort<Result<JobRecord, String>>,
    },

    /// Record a job as Pending without submitting it yet.
    Register {
        descriptor: Box<JobDescriptor>,
        reply: RpcReplyPort<Result<JobRecord, String>>,
    },

    /// Load the run's persisted rows and restart their lanes.
    Resume {
        reply: RpcReplyPort<Result<usize, String>>,
    },

    /// A submission lane finished.
    SubmitOutcome {
        job_id: JobId,
        result: Result<RemoteJobId, String>,
        /// Active-job slot taken for this job, if a cap is configured.
        slot: Option<OwnedSemaphorePermit>,
    },

    /// A poll lane observed something.
    PollOutcome {
        job_id: JobId,
        seq: u64,
        outcome: PollOutcome,
    },

    /// Operator cancel of one job.
    Cancel {
        job_id: JobId,
        reason: String,
        reply: RpcReplyPort<Result<JobRecord, String>>,
    },

    /// Move every non-terminal job to `state` and cancel its remote job.
    Abort {
        state: JobState,
        reason: String,
        reply: RpcReplyPort<usize>,
    },

    /// Get a job by ID.
    GetJob {
        job_id: JobId,
        reply: RpcReplyPort<Option<JobRecord>>,
    },

    /// List the run's jobs.
    ListJobs { reply: RpcReplyPort<Vec<JobRecord>> },

    /// Hand out the lane tracker so callers can wait for lanes to drain.
    Lanes { reply: RpcReplyPort<TaskTracker> },

    /// Periodic tick for time-budget checks.
    Tick,

    /// Stop the tracker.
    Shutdown,
}

/// What a poll lane reports back for one remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Status(batch::RemoteStatus),
    Transient { error: String, failures: u32 },
    Permanent { error: String },
    /// The job's log has not grown for `secs` seconds.
    Stalled { secs: u64 },
}

/// Progress of a run, published on every state change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub counts: StateCounts,
}

impl Progress {
    pub fn total(&self) -> u64 {
        self.counts.total()
    }

    pub fn terminal(&self) -> u64 {
        self.counts.terminal()
    }

    /// Every known job has reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.terminal() == self.total()
    }
}

/// Error type for tracker operations.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Failed to start tracker: {0}")]
    Spawn(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Tracker is not running")]
    Stopped,
}
