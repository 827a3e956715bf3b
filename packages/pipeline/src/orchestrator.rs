//! Manifest to summary: submission, waiting, abort and aggregation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use actors::{TrackerHandle, start_tracker};
use batch::RemoteBatchClient;
use chrono::Utc;
use db::repositories::RunRepository;
use reading_core::{JobDescriptor, JobEvent, JobState, Manifest, RunOutcome, RunSummary, TrackerConfig};
use serde::{Deserialize, Serialize};
use storage::Storage;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::aggregator::ResultAggregator;
use crate::classify::FailureClassifier;
use crate::error::PipelineError;

/// Configuration for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tracker: TrackerConfig,
    /// Wall-clock limit for the whole run; unset waits indefinitely.
    pub global_timeout_secs: Option<u64>,
    /// Pause between consecutive submissions (milliseconds).
    pub stagger_ms: u64,
    /// Write every job's log to object storage during aggregation.
    pub stash_logs: bool,
}

impl PipelineConfig {
    pub fn global_timeout(&self) -> Option<Duration> {
        self.global_timeout_secs.map(Duration::from_secs)
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }
}

/// Drives a manifest through the tracker and the aggregator.
pub struct Orchestrator<C> {
    client: Arc<C>,
    storage: Storage,
    config: PipelineConfig,
    classifier: FailureClassifier,
}

async fn until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl<C: RemoteBatchClient> Orchestrator<C> {
    pub fn new(client: Arc<C>, storage: Storage, config: PipelineConfig) -> Self {
        Self {
            client,
            storage,
            config,
            classifier: FailureClassifier::default(),
        }
    }

    pub fn with_classifier(mut self, classifier: FailureClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Run `manifest` to completion, timeout, or interruption via `shutdown`.
    ///
    /// Per-job failures are reported in the summary; only setup problems
    /// are returned as errors.
    pub async fn run(
        &self,
        manifest: &Manifest,
        shutdown: CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        let descriptors = manifest.descriptors()?;
        let run_id = manifest.run_id.clone();
        if RunRepository::find(&run_id).await?.is_some() {
            return Err(PipelineError::AlreadyArchived(run_id));
        }

        tracing::info!(
            "Starting run {} with {} job(s)",
            run_id,
            descriptors.len()
        );
        let started_at = Utc::now();
        let token = shutdown.child_token();
        let tracker = start_tracker(
            &run_id,
            Arc::clone(&self.client),
            self.config.tracker.clone(),
            token.clone(),
        )
        .await?;
        spawn_event_logger(&tracker);

        let result = self.track(&tracker, descriptors, &shutdown).await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                token.cancel();
                tracker.shutdown().await;
                return Err(e);
            }
        };

        let aggregator = ResultAggregator::new(Arc::clone(&self.client), self.storage.clone())
            .with_classifier(self.classifier.clone())
            .with_log_stash(self.config.stash_logs)
            .with_parallelism(self.config.tracker.concurrency)
            .with_call_timeout(self.config.tracker.call_timeout());
        let records = tracker.list().await?;
        tracker.shutdown().await;

        let summary = aggregator
            .aggregate(&run_id, &records, outcome, started_at)
            .await;
        aggregator.archive(&summary).await;
        Ok(summary)
    }

    async fn track(
        &self,
        tracker: &TrackerHandle,
        descriptors: Vec<JobDescriptor>,
        shutdown: &CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        let resumed = tracker.resume().await?;
        if resumed > 0 {
            tracing::info!("Resumed {} persisted job(s)", resumed);
        }
        let known: HashSet<String> = tracker
            .list()
            .await?
            .into_iter()
            .map(|r| r.descriptor.name().to_string())
            .collect();
        let fresh: Vec<JobDescriptor> = descriptors
            .into_iter()
            .filter(|d| !known.contains(d.name()))
            .collect();

        // Every job is on record as Pending before the clock starts.
        let mut registered = Vec::with_capacity(fresh.len());
        for descriptor in fresh {
            if shutdown.is_cancelled() {
                break;
            }
            tracker.register(descriptor.clone()).await?;
            registered.push(descriptor);
        }

        let deadline = self
            .config
            .global_timeout()
            .map(|limit| tokio::time::Instant::now() + limit);
        let stagger = self.config.stagger();

        let submit_and_wait = async {
            for (ix, descriptor) in registered.into_iter().enumerate() {
                if ix > 0 && !stagger.is_zero() {
                    tokio::time::sleep(stagger).await;
                }
                tracker.submit(descriptor).await?;
            }
            tracker.wait_settled().await?;
            Ok::<_, PipelineError>(())
        };

        let outcome = tokio::select! {
            result = submit_and_wait => {
                result?;
                RunOutcome::Completed
            }
            _ = until(deadline) => RunOutcome::TimedOut,
            _ = shutdown.cancelled() => RunOutcome::Interrupted,
        };

        // No new remote work from here on; let in-flight calls land.
        tracker.token().cancel();
        tracker.drain().await?;

        let abort = match outcome {
            RunOutcome::Completed => None,
            RunOutcome::TimedOut => Some((
                JobState::TimedOut,
                format!(
                    "global timeout of {} s",
                    self.config.global_timeout_secs.unwrap_or_default()
                ),
            )),
            RunOutcome::Interrupted => {
                Some((JobState::Cancelled, "interrupted by operator".to_string()))
            }
        };
        if let Some((state, reason)) = abort {
            tracing::warn!("Run stopped early: {}", reason);
            tracker.abort(state, reason).await?;
        }

        Ok(outcome)
    }
}

/// Log the tracker's lifecycle events until it goes away.
fn spawn_event_logger(tracker: &TrackerHandle) {
    let mut events = tracker.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event @ JobEvent::RemoteCallFailed { .. }) => {
                    tracing::debug!("{}", event.description())
                }
                Ok(event) => tracing::info!("{}", event.description()),
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!("Event logger skipped {} event(s)", missed)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
