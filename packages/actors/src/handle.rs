//! Typed front door to a running tracker actor.

use std::sync::Arc;

use batch::RemoteBatchClient;
use ractor::{Actor, ActorRef};
use reading_core::{JobDescriptor, JobEvent, JobId, JobRecord, JobState, TrackerConfig};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::messages::{Progress, TrackerError, TrackerMessage};
use crate::tracker::{TrackerActor, TrackerArgs};

/// Handle to a spawned tracker.
pub struct TrackerHandle {
    actor: ActorRef<TrackerMessage>,
    join: tokio::task::JoinHandle<()>,
    progress: watch::Receiver<Progress>,
    events: broadcast::Sender<JobEvent>,
    token: CancellationToken,
}

/// Spawn a tracker for `run_id` on top of `client`.
pub async fn start_tracker<C: RemoteBatchClient>(
    run_id: impl Into<String>,
    client: Arc<C>,
    config: TrackerConfig,
    token: CancellationToken,
) -> Result<TrackerHandle, TrackerError> {
    let run_id = run_id.into();
    let (progress_tx, progress) = watch::channel(Progress::default());
    let (events, _) = broadcast::channel(1024);

    let args = TrackerArgs {
        run_id: run_id.clone(),
        client,
        config,
        token: token.clone(),
        progress_tx,
        event_tx: events.clone(),
    };
    let (actor, join) = Actor::spawn(
        Some(format!("tracker-{}", run_id)),
        TrackerActor::<C>::new(),
        args,
    )
    .await
    .map_err(|e| TrackerError::Spawn(e.to_string()))?;

    Ok(TrackerHandle {
        actor,
        join,
        progress,
        events,
        token,
    })
}

impl TrackerHandle {
    /// Register a job and start submitting it.
    ///
    /// Submitting a descriptor id the tracker already knows returns the
    /// existing record without another remote submission.
    pub async fn submit(&self, descriptor: JobDescriptor) -> Result<JobRecord, TrackerError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.actor
            .send_message(TrackerMessage::Submit {
                descriptor: Box::new(descriptor),
                reply: tx.into(),
            })
            .map_err(|_| TrackerError::Stopped)?;
        rx.await
            .map_err(|_| TrackerError::Stopped)?
            .map_err(TrackerError::Rejected)
    }

    /// Record a job as Pending without submitting it.
    ///
    /// A later `submit` of the same descriptor starts its submission.
    pub async fn register(&self, descriptor: JobDescriptor) -> Result<JobRecord, TrackerError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.actor
            .send_message(TrackerMessage::Register {
                descriptor: Box::new(descriptor),
                reply: tx.into(),
            })
            .map_err(|_| TrackerError::Stopped)?;
        rx.await
            .map_err(|_| TrackerError::Stopped)?
            .map_err(TrackerError::Rejected)
    }

    /// Pick up the run's persisted jobs. Returns how many were loaded.
    pub async fn resume(&self) -> Result<usize, TrackerError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.actor
            .send_message(TrackerMessage::Resume { reply: tx.into() })
            .map_err(|_| TrackerError::Stopped)?;
        rx.await
            .map_err(|_| TrackerError::Stopped)?
            .map_err(TrackerError::Rejected)
    }

    /// Cancel one job on behalf of the operator.
    pub async fn cancel(
        &self,
        job_id: JobId,
        reason: impl Into<String>,
    ) -> Result<JobRecord, TrackerError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.actor
            .send_message(TrackerMessage::Cancel {
                job_id,
                reason: reason.into(),
                reply: tx.into(),
            })
            .map_err(|_| TrackerError::Stopped)?;
        rx.await
            .map_err(|_| TrackerError::Stopped)?
            .map_err(TrackerError::Rejected)
    }

    pub async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, TrackerError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.actor
            .send_message(TrackerMessage::GetJob {
                job_id,
                reply: tx.into(),
            })
            .map_err(|_| TrackerError::Stopped)?;
        rx.await.map_err(|_| TrackerError::Stopped)
    }

    pub async fn list(&self) -> Result<Vec<JobRecord>, TrackerError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.actor
            .send_message(TrackerMessage::ListJobs { reply: tx.into() })
            .map_err(|_| TrackerError::Stopped)?;
        rx.await.map_err(|_| TrackerError::Stopped)
    }

    /// Move every non-terminal job to `state` (TimedOut or Cancelled) and
    /// cancel its remote job once. Resolves after the cancels returned.
    pub async fn abort(
        &self,
        state: JobState,
        reason: impl Into<String>,
    ) -> Result<usize, TrackerError> {
        if !matches!(state, JobState::TimedOut | JobState::Cancelled) {
            return Err(TrackerError::Rejected(format!(
                "cannot abort jobs into {}",
                state
            )));
        }
        let (tx, rx) = ractor::concurrency::oneshot();
        self.actor
            .send_message(TrackerMessage::Abort {
                state,
                reason: reason.into(),
                reply: tx.into(),
            })
            .map_err(|_| TrackerError::Stopped)?;
        rx.await.map_err(|_| TrackerError::Stopped)
    }

    /// Wait until every known job is terminal.
    pub async fn wait_settled(&self) -> Result<Progress, TrackerError> {
        let mut progress = self.progress.clone();
        let settled = progress
            .wait_for(Progress::is_settled)
            .await
            .map_err(|_| TrackerError::Stopped)?;
        Ok(*settled)
    }

    /// Wait for every lane to finish its in-flight call and exit.
    ///
    /// Only returns once the run token is cancelled or all jobs are terminal.
    pub async fn drain(&self) -> Result<(), TrackerError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.actor
            .send_message(TrackerMessage::Lanes { reply: tx.into() })
            .map_err(|_| TrackerError::Stopped)?;
        let lanes = rx.await.map_err(|_| TrackerError::Stopped)?;
        lanes.close();
        lanes.wait().await;
        Ok(())
    }

    pub fn progress(&self) -> Progress {
        *self.progress.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Stop the actor and wait for it to exit. Lanes are told to stop.
    pub async fn shutdown(self) {
        let _ = self.actor.send_message(TrackerMessage::Shutdown);
        if let Err(e) = self.join.await {
            tracing::warn!("Tracker task ended abnormally: {}", e);
        }
    }
}
