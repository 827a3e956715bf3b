//! Scripted batch backend for tests and dry runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reading_core::{JobDescriptor, JobId};

use crate::client::{BatchError, RemoteBatchClient, RemoteJobId, RemoteStatus};

/// One scripted answer to a `poll` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimStep {
    Status(RemoteStatus),
    /// The poll call fails with a transient error.
    Transient,
    /// The poll call fails with a permanent error.
    Permanent,
}

impl From<RemoteStatus> for SimStep {
    fn from(status: RemoteStatus) -> Self {
        SimStep::Status(status)
    }
}

struct SimJob {
    name: String,
    script: Vec<SimStep>,
    cursor: usize,
    cancelled: Option<String>,
}

impl SimJob {
    fn next_step(&mut self) -> SimStep {
        if let Some(reason) = &self.cancelled {
            return SimStep::Status(RemoteStatus::failed(format!("terminated: {reason}")));
        }
        let Some(last) = self.script.len().checked_sub(1) else {
            return SimStep::Status(RemoteStatus::Succeeded);
        };
        let step = self.script[self.cursor.min(last)].clone();
        self.cursor += 1;
        step
    }
}

struct SimState {
    scripts: HashMap<String, Vec<SimStep>>,
    default_script: Vec<SimStep>,
    submit_errors: HashMap<String, VecDeque<BatchError>>,
    logs: HashMap<String, Vec<String>>,
    cancel_error: Option<BatchError>,
    by_token: HashMap<JobId, RemoteJobId>,
    jobs: HashMap<RemoteJobId, SimJob>,
    submits: HashMap<JobId, u32>,
    cancels: HashMap<RemoteJobId, u32>,
    polls: u64,
    next_id: u64,
}

/// Batch backend whose jobs follow per-job-name scripts.
///
/// Each `poll` advances a job's script by one step and the last step
/// repeats forever. Jobs without a script run once and then succeed.
/// Counters expose how the tracker drove the backend.
pub struct SimulatedBatchClient {
    state: Mutex<SimState>,
    poll_delay: Option<Duration>,
}

impl Default for SimulatedBatchClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBatchClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                scripts: HashMap::new(),
                default_script: vec![
                    SimStep::Status(RemoteStatus::Running),
                    SimStep::Status(RemoteStatus::Succeeded),
                ],
                submit_errors: HashMap::new(),
                logs: HashMap::new(),
                cancel_error: None,
                by_token: HashMap::new(),
                jobs: HashMap::new(),
                submits: HashMap::new(),
                cancels: HashMap::new(),
                polls: 0,
                next_id: 0,
            }),
            poll_delay: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Script the polls of the job named `job_name`.
    pub fn with_script(self, job_name: impl Into<String>, steps: Vec<SimStep>) -> Self {
        self.lock().scripts.insert(job_name.into(), steps);
        self
    }

    /// Script used for jobs without their own.
    pub fn with_default_script(self, steps: Vec<SimStep>) -> Self {
        self.lock().default_script = steps;
        self
    }

    /// Fail the next submissions of `job_name` with `errors`, in order.
    pub fn with_submit_errors(self, job_name: impl Into<String>, errors: Vec<BatchError>) -> Self {
        self.lock()
            .submit_errors
            .insert(job_name.into(), errors.into());
        self
    }

    pub fn with_logs(self, job_name: impl Into<String>, lines: Vec<String>) -> Self {
        self.lock().logs.insert(job_name.into(), lines);
        self
    }

    /// Make every cancel call fail with `error`.
    pub fn with_cancel_error(self, error: BatchError) -> Self {
        self.lock().cancel_error = Some(error);
        self
    }

    /// Delay every poll answer, e.g. to trip a call timeout.
    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = Some(delay);
        self
    }

    /// Submit calls made for one job, including failed ones.
    pub fn submit_count(&self, job_id: JobId) -> u32 {
        self.lock().submits.get(&job_id).copied().unwrap_or(0)
    }

    /// Distinct remote jobs created.
    pub fn remote_job_count(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn remote_id_for(&self, job_id: JobId) -> Option<RemoteJobId> {
        self.lock().by_token.get(&job_id).cloned()
    }

    pub fn cancel_count(&self, remote_id: &RemoteJobId) -> u32 {
        self.lock().cancels.get(remote_id).copied().unwrap_or(0)
    }

    pub fn total_cancels(&self) -> u32 {
        self.lock().cancels.values().sum()
    }

    pub fn poll_count(&self) -> u64 {
        self.lock().polls
    }
}

impl RemoteBatchClient for SimulatedBatchClient {
    async fn submit(&self, job: &JobDescriptor) -> Result<RemoteJobId, BatchError> {
        let mut state = self.lock();
        *state.submits.entry(job.id()).or_default() += 1;

        if let Some(err) = state
            .submit_errors
            .get_mut(job.name())
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        if let Some(existing) = state.by_token.get(&job.id()) {
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let remote_id = RemoteJobId::new(format!("sim-{:06}", state.next_id));
        let script = state
            .scripts
            .get(job.name())
            .cloned()
            .unwrap_or_else(|| state.default_script.clone());
        state.by_token.insert(job.id(), remote_id.clone());
        state.jobs.insert(
            remote_id.clone(),
            SimJob {
                name: job.name().to_string(),
                script,
                cursor: 0,
                cancelled: None,
            },
        );
        Ok(remote_id)
    }

    async fn poll(&self, remote_id: &RemoteJobId) -> Result<RemoteStatus, BatchError> {
        if let Some(delay) = self.poll_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        state.polls += 1;
        let job = state
            .jobs
            .get_mut(remote_id)
            .ok_or_else(|| BatchError::permanent(format!("unknown job {remote_id}")))?;

        match job.next_step() {
            SimStep::Status(status) => Ok(status),
            SimStep::Transient => Err(BatchError::transient("service unavailable")),
            SimStep::Permanent => Err(BatchError::permanent(format!(
                "job {} rejected by service",
                job.name
            ))),
        }
    }

    async fn cancel(&self, remote_id: &RemoteJobId, reason: &str) -> Result<(), BatchError> {
        let mut state = self.lock();
        *state.cancels.entry(remote_id.clone()).or_default() += 1;
        if let Some(err) = state.cancel_error.clone() {
            return Err(err);
        }
        let job = state
            .jobs
            .get_mut(remote_id)
            .ok_or_else(|| BatchError::permanent(format!("unknown job {remote_id}")))?;
        job.cancelled.get_or_insert_with(|| reason.to_string());
        Ok(())
    }

    async fn fetch_logs(&self, remote_id: &RemoteJobId) -> Result<Vec<String>, BatchError> {
        let state = self.lock();
        let job = state
            .jobs
            .get(remote_id)
            .ok_or_else(|| BatchError::permanent(format!("unknown job {remote_id}")))?;
        Ok(state.logs.get(&job.name).cloned().unwrap_or_default())
    }
}
