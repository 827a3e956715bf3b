//! In-process batch backend that runs readers as local tasks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use reading_core::{JobDescriptor, JobId};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use ulid::Ulid;

use crate::client::{BatchError, RemoteBatchClient, RemoteJobId, RemoteStatus};
use crate::reader::{JobLog, ReaderContext, ReaderRegistry};

struct LocalJob {
    status: RemoteStatus,
    log: JobLog,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct LocalState {
    by_token: HashMap<JobId, RemoteJobId>,
    jobs: HashMap<RemoteJobId, LocalJob>,
    next_id: u64,
}

/// Runs each submitted job as a tokio task on this machine.
///
/// At most `parallelism` readers execute at once; the rest report
/// `Queued` until a slot frees up. Remote ids carry a per-instance ULID,
/// so ids persisted by an earlier process are unknown here rather than
/// pointing at a different job.
pub struct LocalBatchClient {
    instance: Ulid,
    readers: Arc<ReaderRegistry>,
    slots: Arc<Semaphore>,
    state: Arc<Mutex<LocalState>>,
}

impl LocalBatchClient {
    pub fn new(readers: ReaderRegistry, parallelism: usize) -> Self {
        Self {
            instance: Ulid::new(),
            readers: Arc::new(readers),
            slots: Arc::new(Semaphore::new(parallelism.max(1))),
            state: Arc::new(Mutex::new(LocalState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of distinct jobs started on this backend.
    pub fn job_count(&self) -> usize {
        self.lock().jobs.len()
    }
}

fn set_status(state: &Mutex<LocalState>, id: &RemoteJobId, status: RemoteStatus) {
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(job) = state.jobs.get_mut(id) {
        // A cancelled job keeps its terminal status.
        if !matches!(job.status, RemoteStatus::Failed { .. }) {
            job.status = status;
        }
    }
}

impl RemoteBatchClient for LocalBatchClient {
    async fn submit(&self, job: &JobDescriptor) -> Result<RemoteJobId, BatchError> {
        let reader = self.readers.get(job.reader()).ok_or_else(|| {
            BatchError::permanent(format!("no reader registered for {}", job.reader()))
        })?;
        if !reader.is_available() {
            return Err(BatchError::permanent(format!(
                "reader {} is not available on this host",
                job.reader()
            )));
        }

        let mut state = self.lock();
        if let Some(existing) = state.by_token.get(&job.id()) {
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let remote_id = RemoteJobId::new(format!("local-{}-{:06}", self.instance, state.next_id));
        let log = JobLog::new();
        let ctx = ReaderContext {
            job_id: job.id(),
            job_name: job.name().to_string(),
            output_key: job.output_key(),
            log: log.clone(),
        };
        let input = job.input().clone();
        let slots = Arc::clone(&self.slots);
        let shared = Arc::clone(&self.state);
        let id = remote_id.clone();

        let handle = tokio::spawn(async move {
            let Ok(_permit) = slots.acquire_owned().await else {
                return;
            };
            set_status(&shared, &id, RemoteStatus::Running);
            tracing::debug!("Local job {} started", id);

            let status = match reader.run(&input, ctx.clone()).await {
                Ok(_) => RemoteStatus::Succeeded,
                Err(e) => {
                    ctx.log.push(format!("error: {e}"));
                    RemoteStatus::failed(e)
                }
            };
            tracing::debug!("Local job {} finished: {:?}", id, status);
            set_status(&shared, &id, status);
        });

        state.by_token.insert(job.id(), remote_id.clone());
        state.jobs.insert(
            remote_id.clone(),
            LocalJob {
                status: RemoteStatus::Queued,
                log,
                handle: Some(handle),
            },
        );
        Ok(remote_id)
    }

    async fn poll(&self, remote_id: &RemoteJobId) -> Result<RemoteStatus, BatchError> {
        self.lock()
            .jobs
            .get(remote_id)
            .map(|job| job.status.clone())
            .ok_or_else(|| BatchError::permanent(format!("unknown job {remote_id}")))
    }

    async fn cancel(&self, remote_id: &RemoteJobId, reason: &str) -> Result<(), BatchError> {
        let mut state = self.lock();
        let job = state
            .jobs
            .get_mut(remote_id)
            .ok_or_else(|| BatchError::permanent(format!("unknown job {remote_id}")))?;

        if matches!(job.status, RemoteStatus::Succeeded | RemoteStatus::Failed { .. }) {
            return Ok(());
        }
        if let Some(handle) = job.handle.take() {
            handle.abort();
        }
        job.log.push(format!("terminated: {reason}"));
        job.status = RemoteStatus::failed(format!("terminated: {reason}"));
        Ok(())
    }

    async fn fetch_logs(&self, remote_id: &RemoteJobId) -> Result<Vec<String>, BatchError> {
        self.lock()
            .jobs
            .get(remote_id)
            .map(|job| job.log.lines())
            .ok_or_else(|| BatchError::permanent(format!("unknown job {remote_id}")))
    }
}
