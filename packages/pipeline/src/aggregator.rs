//! Turns a run's terminal job records into a RunSummary.

use std::sync::Arc;
use std::time::Duration;

use batch::{RemoteBatchClient, RemoteJobId, with_deadline};
use chrono::{DateTime, Utc};
use db::repositories::RunRepository;
use futures_util::{StreamExt, stream};
use reading_core::{
    FailureClass, FailureReport, JobRecord, JobState, MissingOutput, RunOutcome, RunSummary,
    StateCounts,
};
use storage::Storage;

use crate::classify::FailureClassifier;

/// What inspecting one job produced.
#[derive(Debug, Default)]
struct Inspection {
    failure: Option<FailureReport>,
    missing: Option<MissingOutput>,
}

/// Log label used when stashing a job's log.
fn stash_label(state: JobState) -> &'static str {
    match state {
        JobState::Succeeded => "SUCCESS",
        JobState::TimedOut => "TIMED_OUT",
        JobState::Cancelled => "CANCELLED",
        _ => "FAILURE",
    }
}

/// Object key a job's log is stashed under.
pub fn log_key(record: &JobRecord) -> String {
    format!(
        "logs/{}/{}_{}.log",
        record.descriptor.run_id(),
        stash_label(record.state),
        record.descriptor.name()
    )
}

/// Collects outputs and logs for terminal jobs and classifies failures.
///
/// Aggregation never fails as a whole: storage and log errors end up in
/// the affected job's entry instead.
pub struct ResultAggregator<C> {
    client: Arc<C>,
    storage: Storage,
    classifier: FailureClassifier,
    stash_logs: bool,
    parallelism: usize,
    call_timeout: Duration,
}

impl<C: RemoteBatchClient> ResultAggregator<C> {
    pub fn new(client: Arc<C>, storage: Storage) -> Self {
        Self {
            client,
            storage,
            classifier: FailureClassifier::default(),
            stash_logs: false,
            parallelism: 8,
            call_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_classifier(mut self, classifier: FailureClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Also write every fetched log to object storage.
    pub fn with_log_stash(mut self, stash: bool) -> Self {
        self.stash_logs = stash;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Build the summary for `records`.
    pub async fn aggregate(
        &self,
        run_id: &str,
        records: &[JobRecord],
        outcome: RunOutcome,
        started_at: DateTime<Utc>,
    ) -> RunSummary {
        let inspections: Vec<Inspection> = stream::iter(records)
            .map(|record| self.inspect(record))
            .buffer_unordered(self.parallelism)
            .collect()
            .await;

        let mut summary = RunSummary::new(run_id, started_at);
        summary.outcome = outcome;
        summary.counts = records.iter().map(|r| r.state).collect::<StateCounts>();
        summary.total = records.len() as u64;
        for inspection in inspections {
            summary.failures.extend(inspection.failure);
            summary.missing_outputs.extend(inspection.missing);
        }
        summary.failures.sort_by(|a, b| a.job_name.cmp(&b.job_name));
        summary
            .missing_outputs
            .sort_by(|a, b| a.job_name.cmp(&b.job_name));
        summary.finish(Utc::now());

        tracing::info!(
            "Run {}: {} of {} job(s) succeeded, {} failure(s), {} missing output(s)",
            run_id,
            summary.counts.succeeded,
            summary.total,
            summary.failures.len(),
            summary.missing_outputs.len()
        );
        summary
    }

    /// Store the summary in the archive and drop the run's live rows.
    pub async fn archive(&self, summary: &RunSummary) {
        if let Err(e) = RunRepository::archive(summary).await {
            tracing::warn!("Failed to archive run {}: {}", summary.run_id, e);
        }
    }

    async fn inspect(&self, record: &JobRecord) -> Inspection {
        let descriptor = &record.descriptor;

        if record.state == JobState::Succeeded {
            let output_key = descriptor.output_key();
            let missing = match self.storage.exists(&output_key).await {
                Ok(true) => None,
                Ok(false) => Some("output not found".to_string()),
                Err(e) => Some(format!("output check failed: {}", e)),
            };
            if self.stash_logs
                && let Err(e) = self.fetch_logs(record).await
            {
                tracing::warn!("Could not stash log of {}: {}", descriptor.name(), e);
            }
            return Inspection {
                failure: None,
                missing: missing.map(|reason| MissingOutput {
                    job_id: descriptor.id(),
                    job_name: descriptor.name().to_string(),
                    output_key,
                    reason,
                }),
            };
        }

        let mut reason = record
            .reason
            .clone()
            .unwrap_or_else(|| format!("job {}", record.state));
        if !record.is_terminal() {
            reason = format!("job still {} at aggregation", record.state);
        }

        let logs = match self.fetch_logs(record).await {
            Ok(lines) => lines,
            Err(e) => {
                reason = format!("{}; {}", reason, e);
                Vec::new()
            }
        };

        let classification = if record.is_terminal() {
            self.classifier
                .classify(descriptor.reader(), record.reason.as_deref(), &logs)
        } else {
            FailureClass::Unclassified
        };

        Inspection {
            failure: Some(FailureReport {
                job_id: descriptor.id(),
                job_name: descriptor.name().to_string(),
                reader: descriptor.reader(),
                state: record.state,
                reason,
                classification,
            }),
            missing: None,
        }
    }

    /// Fetch a job's log, stashing it when enabled.
    async fn fetch_logs(&self, record: &JobRecord) -> Result<Vec<String>, String> {
        let Some(remote_id) = record.remote_job_id.clone().map(RemoteJobId::new) else {
            return Ok(Vec::new());
        };

        let lines = with_deadline(self.call_timeout, self.client.fetch_logs(&remote_id))
            .await
            .map_err(|e| format!("log fetch failed: {}", e))?;

        if self.stash_logs {
            let key = log_key(record);
            if let Err(e) = self.storage.put_text(&key, lines.join("\n")).await {
                tracing::warn!("Failed to stash log {}: {}", key, e);
            }
        }
        Ok(lines)
    }
}
