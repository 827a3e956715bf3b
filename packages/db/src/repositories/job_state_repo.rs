//! Repository for the persisted job-state table.

use reading_core::{JobId, JobRecord, StateCounts};

use crate::{DbError, get_db};

const TABLE: &str = "job_state";

/// Repository for job-state rows.
///
/// Only the job tracker writes through this; readers use the `list_*`
/// functions once a run is settled.
pub struct JobStateRepository;

impl JobStateRepository {
    /// Write a row, replacing any previous version.
    pub async fn save(record: &JobRecord) -> Result<JobRecord, DbError> {
        let db = get_db()?;

        let saved: Option<JobRecord> = db
            .upsert((TABLE, record.job_id().to_string()))
            .content(record.clone())
            .await?;

        saved.ok_or_else(|| DbError::Query(format!("Failed to save job {}", record.job_id())))
    }

    /// Get a row by job id.
    pub async fn get(id: JobId) -> Result<JobRecord, DbError> {
        Self::find(id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))
    }

    pub async fn find(id: JobId) -> Result<Option<JobRecord>, DbError> {
        let db = get_db()?;
        let record: Option<JobRecord> = db.select((TABLE, id.to_string())).await?;
        Ok(record)
    }

    /// All rows of a run, oldest descriptor first.
    pub async fn list_by_run(run_id: &str) -> Result<Vec<JobRecord>, DbError> {
        let db = get_db()?;

        let mut response = db
            .query("SELECT * FROM job_state WHERE descriptor.run_id = $run_id")
            .bind(("run_id", run_id.to_string()))
            .await?;
        let mut records: Vec<JobRecord> = response.take(0)?;

        records.sort_by(|a, b| {
            a.descriptor
                .created_at()
                .cmp(&b.descriptor.created_at())
                .then_with(|| a.descriptor.name().cmp(b.descriptor.name()))
        });
        Ok(records)
    }

    /// Rows of a run that still need tracking.
    pub async fn list_non_terminal(run_id: &str) -> Result<Vec<JobRecord>, DbError> {
        let mut records = Self::list_by_run(run_id).await?;
        records.retain(|r| !r.is_terminal());
        Ok(records)
    }

    /// Count a run's rows by state.
    pub async fn count_by_state(run_id: &str) -> Result<StateCounts, DbError> {
        let records = Self::list_by_run(run_id).await?;
        Ok(records.iter().map(|r| r.state).collect())
    }

    /// Delete every row of a run.
    pub async fn delete_run(run_id: &str) -> Result<(), DbError> {
        let db = get_db()?;
        db.query("DELETE job_state WHERE descriptor.run_id = $run_id")
            .bind(("run_id", run_id.to_string()))
            .await?
            .check()?;
        Ok(())
    }
}
