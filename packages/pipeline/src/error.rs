//! Error type for pipeline runs.

use actors::TrackerError;
use db::DbError;
use reading_core::ManifestError;

/// Errors that stop a run before it produces a summary.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Run {0} is already archived")]
    AlreadyArchived(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),
}
