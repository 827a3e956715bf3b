//! Remote batch-compute client contract.

use std::future::Future;
use std::time::Duration;

use reading_core::{JobDescriptor, JobState};
use serde::{Deserialize, Serialize};

/// Identifier assigned by the remote service on submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteJobId(pub String);

impl RemoteJobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RemoteJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status reported by the remote service for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoteStatus {
    /// Accepted and waiting for compute.
    Queued,
    Running,
    Succeeded,
    Failed { reason: String },
}

impl RemoteStatus {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Tracker state this status corresponds to.
    pub fn job_state(&self) -> JobState {
        match self {
            RemoteStatus::Queued => JobState::Submitted,
            RemoteStatus::Running => JobState::Running,
            RemoteStatus::Succeeded => JobState::Succeeded,
            RemoteStatus::Failed { .. } => JobState::Failed,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            RemoteStatus::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Errors from the remote service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    /// Network or service hiccup; the call may be retried.
    #[error("transient batch error: {0}")]
    Transient(String),

    /// The request itself is bad; retrying will not help.
    #[error("permanent batch error: {0}")]
    Permanent(String),
}

impl BatchError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, BatchError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            BatchError::Transient(m) | BatchError::Permanent(m) => m,
        }
    }
}

/// A batch-compute backend.
///
/// `submit` must be idempotent on `JobDescriptor::id`: submitting the same
/// descriptor twice returns the first remote id instead of starting a
/// second remote job.
pub trait RemoteBatchClient: Send + Sync + 'static {
    fn submit(
        &self,
        job: &JobDescriptor,
    ) -> impl Future<Output = Result<RemoteJobId, BatchError>> + Send;

    fn poll(
        &self,
        remote_id: &RemoteJobId,
    ) -> impl Future<Output = Result<RemoteStatus, BatchError>> + Send;

    fn cancel(
        &self,
        remote_id: &RemoteJobId,
        reason: &str,
    ) -> impl Future<Output = Result<(), BatchError>> + Send;

    fn fetch_logs(
        &self,
        remote_id: &RemoteJobId,
    ) -> impl Future<Output = Result<Vec<String>, BatchError>> + Send;
}

/// Run a remote call under a deadline; an elapsed deadline is transient.
pub async fn with_deadline<T, F>(limit: Duration, call: F) -> Result<T, BatchError>
where
    F: Future<Output = Result<T, BatchError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BatchError::transient(format!(
            "call timed out after {}ms",
            limit.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    #[tokio::test]
    async fn elapsed_deadline_is_transient() {
        let result: Result<(), BatchError> = with_deadline(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(BatchError::Transient(_))));
    }

    #[tokio::test]
    async fn deadline_passes_through_permanent_errors() {
        let result: Result<(), BatchError> = with_deadline(Duration::from_secs(1), async {
            Err(BatchError::permanent("bad job definition"))
        })
        .await;
        assert_eq!(result, Err(BatchError::permanent("bad job definition")));
    }

    #[test]
    fn remote_status_maps_to_job_state() {
        assert_eq!(RemoteStatus::Queued.job_state(), JobState::Submitted);
        assert_eq!(RemoteStatus::failed("oom").job_state(), JobState::Failed);
        assert_eq!(RemoteStatus::failed("oom").reason(), Some("oom"));
    }
}
