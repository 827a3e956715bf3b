//! Run summary archive.

use reading_core::RunSummary;

use crate::repositories::JobStateRepository;
use crate::{DbError, get_db};

/// Repository for archived run summaries.
pub struct RunRepository;

impl RunRepository {
    /// Store a summary and drop the run's live job-state rows.
    pub async fn archive(summary: &RunSummary) -> Result<RunSummary, DbError> {
        let db = get_db()?;

        let saved: Option<RunSummary> = db
            .upsert(("run_summary", summary.run_id.clone()))
            .content(summary.clone())
            .await?;
        let saved = saved.ok_or_else(|| {
            DbError::Query(format!("Failed to archive run {}", summary.run_id))
        })?;

        JobStateRepository::delete_run(&summary.run_id).await?;
        Ok(saved)
    }

    /// Get an archived summary by run id.
    pub async fn get(run_id: &str) -> Result<RunSummary, DbError> {
        Self::find(run_id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("Run not found: {}", run_id)))
    }

    pub async fn find(run_id: &str) -> Result<Option<RunSummary>, DbError> {
        let db = get_db()?;
        let summary: Option<RunSummary> = db.select(("run_summary", run_id.to_string())).await?;
        Ok(summary)
    }
}
