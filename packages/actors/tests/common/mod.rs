#![allow(dead_code)]

use std::sync::LazyLock;
use std::time::Duration;

use actors::TrackerHandle;
use db::{DbConfig, DbError};
use reading_core::{
    InputRef, JobDescriptor, JobId, JobRecord, ReaderName, ResourceSpec, RetryPolicy,
    TrackerConfig,
};
use tokio::sync::{Mutex, MutexGuard};

static TEST_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// One runtime for every test in this binary: the global database connection
/// lives on the runtime that opened it, so per-test runtimes would strand it.
static RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("test runtime")
});

pub fn block_on<F: std::future::Future>(future: F) -> F::Output {
    RUNTIME.block_on(future)
}

pub async fn setup_db() -> Result<MutexGuard<'static, ()>, DbError> {
    let guard = TEST_LOCK.lock().await;
    db::init(DbConfig::memory()).await?;
    let db_conn = db::get_db()?;
    db_conn
        .query("DELETE job_state; DELETE run_summary;")
        .await?;
    Ok(guard)
}

pub fn run_id(prefix: &str) -> String {
    format!("{}_{}", prefix, JobId::new())
}

pub fn fast_config() -> TrackerConfig {
    TrackerConfig {
        concurrency: 4,
        poll_interval_ms: 5,
        call_timeout_ms: 1_000,
        tick_interval_ms: 20,
        retry: RetryPolicy {
            base_delay_ms: 1,
            max_delay_ms: 4,
            max_consecutive_failures: 10,
        },
        ..Default::default()
    }
}

pub fn descriptor(run_id: &str, index: usize) -> JobDescriptor {
    descriptor_with(run_id, index, ResourceSpec::default())
}

pub fn descriptor_with(run_id: &str, index: usize, resources: ResourceSpec) -> JobDescriptor {
    JobDescriptor::new(
        run_id,
        format!("{}_{}_reach", run_id, index),
        ReaderName::Reach,
        InputRef::Object {
            key: format!("inputs/{}", index),
        },
        resources,
    )
}

/// Poll the tracker until `job_id` satisfies `done`.
pub async fn wait_for<F>(tracker: &TrackerHandle, job_id: JobId, done: F) -> JobRecord
where
    F: Fn(&JobRecord) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(record) = tracker.get(job_id).await.unwrap()
            && done(&record)
        {
            return record;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} never reached the expected state",
            job_id
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn settle(tracker: &TrackerHandle) {
    tokio::time::timeout(Duration::from_secs(10), tracker.wait_settled())
        .await
        .expect("run did not settle")
        .unwrap();
}
