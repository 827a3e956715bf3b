//! Read-only view of a run's persisted state.

use db::repositories::{JobStateRepository, RunRepository};
use reading_core::{JobRecord, RunSummary, StateCounts};
use serde::Serialize;

use crate::error::PipelineError;

/// Where a run stands according to the database.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Jobs are still tracked in the live job-state table.
    Live {
        run_id: String,
        counts: StateCounts,
        jobs: Vec<JobRecord>,
    },
    /// The run finished and its summary was archived.
    Archived { summary: RunSummary },
}

/// Look up `run_id`, preferring live rows over the archive.
pub async fn run_status(run_id: &str) -> Result<RunStatus, PipelineError> {
    let jobs = JobStateRepository::list_by_run(run_id).await?;
    if !jobs.is_empty() {
        let counts = jobs.iter().map(|r| r.state).collect();
        return Ok(RunStatus::Live {
            run_id: run_id.to_string(),
            counts,
            jobs,
        });
    }

    match RunRepository::find(run_id).await? {
        Some(summary) => Ok(RunStatus::Archived { summary }),
        None => Err(PipelineError::RunNotFound(run_id.to_string())),
    }
}
