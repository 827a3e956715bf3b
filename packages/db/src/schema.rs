//! Database schema definitions using SurrealQL.

use crate::{DbError, get_db};

/// Initialize the database schema.
///
/// This creates all necessary tables and indexes.
pub async fn init_schema() -> Result<(), DbError> {
    let db = get_db()?;

    tracing::info!("Initializing database schema...");

    db.query(JOB_STATE_SCHEMA).await?.check()?;
    db.query(RUN_SUMMARY_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job state table: one row per tracked job, keyed by job id.
///
/// Rows nest the full descriptor, so the table stays schemaless and only
/// the lookup paths are indexed.
const JOB_STATE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job_state SCHEMALESS;

DEFINE INDEX IF NOT EXISTS job_state_run ON job_state FIELDS descriptor.run_id;
DEFINE INDEX IF NOT EXISTS job_state_state ON job_state FIELDS state;
DEFINE INDEX IF NOT EXISTS job_state_remote ON job_state FIELDS remote_job_id;
"#;

/// Archived run summaries, keyed by run id.
const RUN_SUMMARY_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS run_summary SCHEMALESS;

DEFINE INDEX IF NOT EXISTS run_summary_finished ON run_summary FIELDS finished_at;
"#;
