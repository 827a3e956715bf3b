//! Tracker actor: the single owner of a run's job records.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

use batch::{RemoteBatchClient, RemoteJobId};
use chrono::Utc;
use db::repositories::JobStateRepository;
use futures_util::future::join_all;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use reading_core::{
    JobDescriptor, JobEvent, JobId, JobRecord, JobState, StateCounts, TrackerConfig,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::lanes::{LaneContext, PollSettings, cancel_remote, poll_lane, submit_lane};
use crate::messages::{PollOutcome, Progress, TrackerMessage};

/// Reason recorded when transient poll failures use up the retry budget.
pub const POLLING_EXHAUSTED: &str = "polling exhausted";

/// Arguments for spawning a tracker.
pub struct TrackerArgs<C> {
    pub run_id: String,
    pub client: Arc<C>,
    pub config: TrackerConfig,
    /// Run-wide token; cancelling it stops new remote work.
    pub token: CancellationToken,
    pub progress_tx: watch::Sender<Progress>,
    pub event_tx: broadcast::Sender<JobEvent>,
}

/// State for the tracker actor.
pub struct TrackerState<C> {
    run_id: String,
    client: Arc<C>,
    config: TrackerConfig,
    token: CancellationToken,
    /// Bounds remote calls in flight across all lanes.
    permits: Arc<Semaphore>,
    /// Bounds Submitted + Running jobs when a cap is configured.
    active_slots: Option<Arc<Semaphore>>,
    held_slots: HashMap<JobId, OwnedSemaphorePermit>,
    records: HashMap<JobId, JobRecord>,
    /// Registered jobs whose submission lane has not started.
    unlaunched: HashSet<JobId>,
    job_tokens: HashMap<JobId, CancellationToken>,
    last_seq: HashMap<JobId, u64>,
    lanes: TaskTracker,
    progress_tx: watch::Sender<Progress>,
    event_tx: broadcast::Sender<JobEvent>,
}

impl<C: RemoteBatchClient> TrackerState<C> {
    fn new(args: TrackerArgs<C>) -> Self {
        let active_slots = args
            .config
            .max_active_jobs
            .map(|cap| Arc::new(Semaphore::new(cap.max(1))));
        Self {
            run_id: args.run_id,
            client: args.client,
            permits: Arc::new(Semaphore::new(args.config.concurrency.max(1))),
            config: args.config,
            token: args.token,
            active_slots,
            held_slots: HashMap::new(),
            records: HashMap::new(),
            unlaunched: HashSet::new(),
            job_tokens: HashMap::new(),
            last_seq: HashMap::new(),
            lanes: TaskTracker::new(),
            progress_tx: args.progress_tx,
            event_tx: args.event_tx,
        }
    }

    fn broadcast(&self, event: JobEvent) {
        let _ = self.event_tx.send(event);
    }

    fn publish_progress(&self) {
        let counts: StateCounts = self.records.values().map(|r| r.state).collect();
        self.progress_tx.send_replace(Progress { counts });
    }

    fn lane_context(&mut self, job_id: JobId, myself: &ActorRef<TrackerMessage>) -> LaneContext<C> {
        let token = self
            .job_tokens
            .entry(job_id)
            .or_insert_with(|| self.token.child_token())
            .clone();
        LaneContext {
            client: Arc::clone(&self.client),
            tracker: myself.clone(),
            permits: Arc::clone(&self.permits),
            token,
            call_timeout: self.config.call_timeout(),
            retry: self.config.retry.clone(),
        }
    }

    fn spawn_submit_lane(&mut self, descriptor: JobDescriptor, myself: &ActorRef<TrackerMessage>) {
        let ctx = self.lane_context(descriptor.id(), myself);
        let slots = self.active_slots.clone();
        self.lanes.spawn(submit_lane(ctx, descriptor, slots));
    }

    fn spawn_poll_lane(
        &mut self,
        job_id: JobId,
        remote_id: RemoteJobId,
        myself: &ActorRef<TrackerMessage>,
    ) {
        if self.token.is_cancelled() {
            return;
        }
        let ctx = self.lane_context(job_id, myself);
        if ctx.token.is_cancelled() {
            return;
        }
        let settings = PollSettings {
            interval: self.config.poll_interval(),
            stall_timeout: self.config.stall_timeout(),
        };
        self.lanes.spawn(poll_lane(ctx, job_id, remote_id, settings));
    }

    /// Flag the job's remote job for cancellation and start the call.
    ///
    /// Returns `None` when there is nothing to cancel or a cancel was
    /// already issued for this job.
    fn issue_cancel(&mut self, job_id: JobId, reason: &str) -> Option<JoinHandle<()>> {
        let record = self.records.get_mut(&job_id)?;
        if record.cancel_issued {
            return None;
        }
        let remote_id = RemoteJobId::new(record.remote_job_id.clone()?);
        record.cancel_issued = true;

        let task = cancel_remote(
            Arc::clone(&self.client),
            Arc::clone(&self.permits),
            self.config.call_timeout(),
            self.event_tx.clone(),
            job_id,
            remote_id,
            reason.to_string(),
        );
        Some(self.lanes.spawn(task))
    }

    async fn persist(&self, job_id: JobId) {
        if let Some(record) = self.records.get(&job_id)
            && let Err(e) = JobStateRepository::save(record).await
        {
            tracing::warn!("Failed to persist job {}: {}", job_id, e);
        }
    }

    /// Apply a state change, persist it, and release a finished job's resources.
    async fn set_state(&mut self, job_id: JobId, next: JobState, reason: Option<String>) {
        let Some(record) = self.records.get_mut(&job_id) else {
            return;
        };
        let old_state = record.state;
        if old_state == next {
            return;
        }
        if let Err(e) = record.transition(next, reason.clone()) {
            tracing::warn!("{}", e);
            return;
        }

        self.persist(job_id).await;
        if next.is_terminal() {
            self.release(job_id);
        }

        self.broadcast(JobEvent::JobStateChanged {
            job_id,
            old_state,
            new_state: next,
            reason,
            timestamp: Utc::now(),
        });
        self.publish_progress();
    }

    /// Persist a new job as Pending and start tracking it.
    async fn register(&mut self, descriptor: JobDescriptor) -> Result<JobRecord, String> {
        if descriptor.run_id() != self.run_id {
            return Err(format!(
                "job {} belongs to run {}, not {}",
                descriptor.name(),
                descriptor.run_id(),
                self.run_id
            ));
        }
        if self.token.is_cancelled() {
            return Err("Run is shutting down".into());
        }

        let job_id = descriptor.id();
        let record = JobRecord::pending(descriptor.clone());
        JobStateRepository::save(&record)
            .await
            .map_err(|e| format!("Failed to persist job: {}", e))?;

        self.records.insert(job_id, record.clone());
        self.unlaunched.insert(job_id);
        self.broadcast(JobEvent::JobRegistered {
            job_id,
            job_name: descriptor.name().to_string(),
            timestamp: Utc::now(),
        });
        self.publish_progress();
        Ok(record)
    }

    /// Start the submission lane of a registered job, once.
    fn launch(&mut self, job_id: JobId, myself: &ActorRef<TrackerMessage>) {
        if !self.unlaunched.remove(&job_id) || self.token.is_cancelled() {
            return;
        }
        if let Some(record) = self.records.get(&job_id)
            && record.state == JobState::Pending
        {
            let descriptor = record.descriptor.clone();
            self.spawn_submit_lane(descriptor, myself);
        }
    }

    fn release(&mut self, job_id: JobId) {
        self.unlaunched.remove(&job_id);
        self.held_slots.remove(&job_id);
        if let Some(token) = self.job_tokens.remove(&job_id) {
            token.cancel();
        }
        self.last_seq.remove(&job_id);
    }

    async fn on_submitted(
        &mut self,
        job_id: JobId,
        remote_id: RemoteJobId,
        slot: Option<OwnedSemaphorePermit>,
        myself: &ActorRef<TrackerMessage>,
    ) {
        let Some(record) = self.records.get_mut(&job_id) else {
            return;
        };
        record.remote_job_id = Some(remote_id.to_string());

        if record.is_terminal() {
            // Cancelled while the submit call was in flight.
            let reason = record
                .reason
                .clone()
                .unwrap_or_else(|| format!("job {}", record.state));
            self.issue_cancel(job_id, &reason);
            self.persist(job_id).await;
            return;
        }

        if let Err(e) = record.transition(JobState::Submitted, None) {
            tracing::warn!("{}", e);
            return;
        }
        if let Err(e) = JobStateRepository::save(record).await {
            tracing::warn!(
                "Failed to persist submission of job {}, cancelling {}: {}",
                job_id,
                remote_id,
                e
            );
            self.issue_cancel(job_id, "state write failed");
            self.set_state(
                job_id,
                JobState::Failed,
                Some(format!("state write failed: {}", e)),
            )
            .await;
            return;
        }

        if let Some(slot) = slot {
            self.held_slots.insert(job_id, slot);
        }
        self.broadcast(JobEvent::JobSubmitted {
            job_id,
            remote_job_id: remote_id.to_string(),
            timestamp: Utc::now(),
        });
        self.broadcast(JobEvent::JobStateChanged {
            job_id,
            old_state: JobState::Pending,
            new_state: JobState::Submitted,
            reason: None,
            timestamp: Utc::now(),
        });
        self.publish_progress();
        self.spawn_poll_lane(job_id, remote_id, myself);
    }

    async fn on_poll(&mut self, job_id: JobId, seq: u64, outcome: PollOutcome) {
        let last = self.last_seq.entry(job_id).or_insert(0);
        if seq <= *last {
            tracing::debug!("Dropping stale poll result {} for job {}", seq, job_id);
            return;
        }
        *last = seq;

        let Some(record) = self.records.get_mut(&job_id) else {
            return;
        };
        if record.is_terminal() {
            return;
        }
        record.last_poll_at = Some(Utc::now());

        match outcome {
            PollOutcome::Status(status) => {
                record.retry_count = 0;
                let next = status.job_state();
                if next == record.state {
                    self.persist(job_id).await;
                } else {
                    let reason = status.reason().map(str::to_string);
                    self.set_state(job_id, next, reason).await;
                }
            }
            PollOutcome::Transient { error, failures } => {
                record.retry_count = failures;
                self.broadcast(JobEvent::RemoteCallFailed {
                    job_id,
                    attempt: failures,
                    error,
                    timestamp: Utc::now(),
                });
                if self.config.retry.exhausted(failures) {
                    self.issue_cancel(job_id, POLLING_EXHAUSTED);
                    self.set_state(job_id, JobState::Failed, Some(POLLING_EXHAUSTED.into()))
                        .await;
                } else {
                    self.persist(job_id).await;
                }
            }
            PollOutcome::Permanent { error } => {
                self.set_state(job_id, JobState::Failed, Some(error)).await;
            }
            PollOutcome::Stalled { secs } => {
                let reason = format!("log stalled for {} s", secs);
                self.issue_cancel(job_id, &reason);
                self.set_state(job_id, JobState::TimedOut, Some(reason)).await;
            }
        }
    }

    async fn enforce_budgets(&mut self) {
        let now = Utc::now();
        let over: Vec<(JobId, u64)> = self
            .records
            .values()
            .filter(|r| r.over_budget(now))
            .map(|r| (r.job_id(), r.descriptor.resources().timeout_secs))
            .collect();

        for (job_id, budget) in over {
            let reason = format!("exceeded time budget of {} s", budget);
            tracing::info!("Job {} {}", job_id, reason);
            self.issue_cancel(job_id, &reason);
            self.set_state(job_id, JobState::TimedOut, Some(reason)).await;
        }
    }

    async fn resume(&mut self, myself: &ActorRef<TrackerMessage>) -> Result<usize, String> {
        let rows = JobStateRepository::list_by_run(&self.run_id)
            .await
            .map_err(|e| format!("Failed to load run {}: {}", self.run_id, e))?;

        let mut loaded = 0;
        for record in rows {
            let job_id = record.job_id();
            if self.records.contains_key(&job_id) {
                continue;
            }
            loaded += 1;

            let state = record.state;
            let remote_id = record.remote_job_id.clone().map(RemoteJobId::new);
            let descriptor = record.descriptor.clone();
            self.records.insert(job_id, record);

            match (state, remote_id) {
                (s, _) if s.is_terminal() => {}
                (JobState::Submitted | JobState::Running, Some(remote_id)) => {
                    if let Some(slot) = self
                        .active_slots
                        .as_ref()
                        .and_then(|slots| Arc::clone(slots).try_acquire_owned().ok())
                    {
                        self.held_slots.insert(job_id, slot);
                    }
                    tracing::info!("Resuming polls of job {} ({})", job_id, remote_id);
                    self.spawn_poll_lane(job_id, remote_id, myself);
                }
                _ => {
                    if let Some(record) = self.records.get_mut(&job_id) {
                        record.state = JobState::Pending;
                    }
                    tracing::info!("Resubmitting job {}", descriptor.name());
                    self.spawn_submit_lane(descriptor, myself);
                }
            }
        }

        self.publish_progress();
        Ok(loaded)
    }

    fn list(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| {
            a.descriptor
                .created_at()
                .cmp(&b.descriptor.created_at())
                .then_with(|| a.descriptor.name().cmp(b.descriptor.name()))
        });
        records
    }
}

/// Actor that tracks every job of one run.
pub struct TrackerActor<C> {
    _client: PhantomData<fn() -> C>,
}

impl<C> TrackerActor<C> {
    pub fn new() -> Self {
        Self {
            _client: PhantomData,
        }
    }
}

impl<C> Default for TrackerActor<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: RemoteBatchClient> Actor for TrackerActor<C> {
    type Msg = TrackerMessage;
    type State = TrackerState<C>;
    type Arguments = TrackerArgs<C>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting tracker for run {}", args.run_id);

        // Start periodic tick
        let interval = args.config.tick_interval();
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            loop {
                interval.tick().await;
                if myself_clone.send_message(TrackerMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(TrackerState::new(args))
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            TrackerMessage::Submit { descriptor, reply } => {
                let job_id = descriptor.id();
                let result = match state.records.get(&job_id) {
                    Some(existing) => Ok(existing.clone()),
                    None => state.register(*descriptor).await,
                };
                if result.is_ok() {
                    state.launch(job_id, &myself);
                }
                let _ = reply.send(result);
            }

            TrackerMessage::Register { descriptor, reply } => {
                let result = match state.records.get(&descriptor.id()) {
                    Some(existing) => Ok(existing.clone()),
                    None => state.register(*descriptor).await,
                };
                let _ = reply.send(result);
            }

            TrackerMessage::Resume { reply } => {
                let _ = reply.send(state.resume(&myself).await);
            }

            TrackerMessage::SubmitOutcome {
                job_id,
                result,
                slot,
            } => match result {
                Ok(remote_id) => state.on_submitted(job_id, remote_id, slot, &myself).await,
                Err(reason) => {
                    tracing::warn!("Job {} was not submitted: {}", job_id, reason);
                    state.set_state(job_id, JobState::Failed, Some(reason)).await;
                }
            },

            TrackerMessage::PollOutcome {
                job_id,
                seq,
                outcome,
            } => {
                state.on_poll(job_id, seq, outcome).await;
            }

            TrackerMessage::Cancel {
                job_id,
                reason,
                reply,
            } => {
                let Some(record) = state.records.get(&job_id) else {
                    let _ = reply.send(Err("Job not found".into()));
                    return Ok(());
                };
                if record.is_terminal() {
                    let _ = reply.send(Err(format!("Job is already {}", record.state)));
                    return Ok(());
                }

                state.issue_cancel(job_id, &reason);
                state
                    .set_state(job_id, JobState::Cancelled, Some(reason))
                    .await;
                let _ = reply.send(
                    state
                        .records
                        .get(&job_id)
                        .cloned()
                        .ok_or_else(|| "Job not found".to_string()),
                );
            }

            TrackerMessage::Abort {
                state: target,
                reason,
                reply,
            } => {
                let open: Vec<JobId> = state
                    .records
                    .values()
                    .filter(|r| !r.is_terminal())
                    .map(|r| r.job_id())
                    .collect();

                let mut cancels = Vec::new();
                for job_id in &open {
                    if let Some(handle) = state.issue_cancel(*job_id, &reason) {
                        cancels.push(handle);
                    }
                    state.set_state(*job_id, target, Some(reason.clone())).await;
                }
                join_all(cancels).await;

                tracing::info!(
                    "Run {}: {} job(s) moved to {} ({})",
                    state.run_id,
                    open.len(),
                    target,
                    reason
                );
                let _ = reply.send(open.len());
            }

            TrackerMessage::GetJob { job_id, reply } => {
                let _ = reply.send(state.records.get(&job_id).cloned());
            }

            TrackerMessage::ListJobs { reply } => {
                let _ = reply.send(state.list());
            }

            TrackerMessage::Lanes { reply } => {
                let _ = reply.send(state.lanes.clone());
            }

            TrackerMessage::Tick => {
                state.enforce_budgets().await;
            }

            TrackerMessage::Shutdown => {
                tracing::info!("Shutting down tracker for run {}", state.run_id);
                for token in state.job_tokens.values() {
                    token.cancel();
                }
                myself.stop(None);
                return Ok(());
            }
        }

        Ok(())
    }
}
