#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;

use chrono::Utc;
use reading_core::{
    FailureClass, FailureReport, InputRef, JobDescriptor, JobRecord, JobState, ReaderName,
    ResourceSpec, RunSummary, StateCounts,
};

use db::DbError;
use db::repositories::{JobStateRepository, RunRepository};

fn record(run_id: &str, name: &str, reader: ReaderName) -> JobRecord {
    JobRecord::pending(JobDescriptor::new(
        run_id,
        name,
        reader,
        InputRef::IdRange {
            list_key: format!("{run_id}/ids"),
            start: 0,
            end: 100,
        },
        ResourceSpec::default(),
    ))
}

#[test]
fn job_state_round_trip() -> Result<(), Box<dyn Error>> {
    common::block_on(async move {
    let _guard = common::setup_db().await?;

    let mut rec = record("rt", "rt_0_100_reach", ReaderName::Reach);
    let saved = JobStateRepository::save(&rec).await?;
    assert_eq!(saved, rec);
    assert_eq!(JobStateRepository::find(rec.job_id()).await?, Some(rec.clone()));

    rec.remote_job_id = Some("remote-1".into());
    rec.transition(JobState::Submitted, None)?;
    JobStateRepository::save(&rec).await?;

    let loaded = JobStateRepository::get(rec.job_id()).await?;
    assert_eq!(loaded.state, JobState::Submitted);
    assert_eq!(loaded.remote_job_id.as_deref(), Some("remote-1"));
    assert_eq!(loaded.descriptor, rec.descriptor);
    assert!(loaded.submitted_at.is_some());

    JobStateRepository::delete_run("rt").await?;
    let missing = JobStateRepository::get(rec.job_id()).await;
    assert!(matches!(missing, Err(DbError::NotFound(_))));

    Ok(())
    })
}

#[test]
fn list_and_count_are_scoped_to_run() -> Result<(), Box<dyn Error>> {
    common::block_on(async move {
    let _guard = common::setup_db().await?;

    let mut done = record("scoped", "scoped_0_100_reach", ReaderName::Reach);
    done.transition(JobState::Submitted, None)?;
    done.transition(JobState::Running, None)?;
    done.transition(JobState::Succeeded, None)?;
    JobStateRepository::save(&done).await?;

    let mut running = record("scoped", "scoped_0_100_sparser", ReaderName::Sparser);
    running.remote_job_id = Some("remote-2".into());
    running.transition(JobState::Submitted, None)?;
    running.transition(JobState::Running, None)?;
    JobStateRepository::save(&running).await?;

    let pending = record("scoped", "scoped_0_100_isi", ReaderName::Isi);
    JobStateRepository::save(&pending).await?;

    JobStateRepository::save(&record("other", "other_0_100_reach", ReaderName::Reach)).await?;

    let all = JobStateRepository::list_by_run("scoped").await?;
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|r| r.descriptor.run_id() == "scoped"));

    let live = JobStateRepository::list_non_terminal("scoped").await?;
    let mut live_names: Vec<&str> = live.iter().map(|r| r.descriptor.name()).collect();
    live_names.sort();
    assert_eq!(live_names, ["scoped_0_100_isi", "scoped_0_100_sparser"]);

    let counts = JobStateRepository::count_by_state("scoped").await?;
    assert_eq!(counts.succeeded, 1);
    assert_eq!(counts.running, 1);
    assert_eq!(counts.pending, 1);
    assert_eq!(counts.total(), 3);

    Ok(())
    })
}

#[test]
fn archive_moves_run_into_summary() -> Result<(), Box<dyn Error>> {
    common::block_on(async move {
    let _guard = common::setup_db().await?;

    let mut failed = record("arch", "arch_0_100_trips", ReaderName::Trips);
    failed.transition(JobState::Failed, Some("image pull failed".into()))?;
    JobStateRepository::save(&failed).await?;

    let mut summary = RunSummary::new("arch", Utc::now());
    summary.total = 1;
    summary.counts = StateCounts {
        failed: 1,
        ..Default::default()
    };
    summary.failures.push(FailureReport {
        job_id: failed.job_id(),
        job_name: failed.descriptor.name().to_string(),
        reader: ReaderName::Trips,
        state: JobState::Failed,
        reason: "image pull failed".into(),
        classification: FailureClass::Permanent,
    });
    summary.finish(Utc::now());

    let archived = RunRepository::archive(&summary).await?;
    assert_eq!(archived, summary);

    assert!(JobStateRepository::list_by_run("arch").await?.is_empty());

    let loaded = RunRepository::get("arch").await?;
    assert_eq!(loaded.failures.len(), 1);
    assert_eq!(loaded.counts.failed, 1);

    let missing = RunRepository::get("never-ran").await;
    assert!(matches!(missing, Err(DbError::NotFound(_))));

    let db_conn = db::get_db()?;
    let mut response = db_conn
        .query("SELECT run_id FROM run_summary WHERE run_id = $run_id")
        .bind(("run_id", "arch".to_string()))
        .await?;
    let rows: Vec<serde_json::Value> = response.take(0)?;
    assert_eq!(rows.len(), 1);

    Ok(())
    })
}
