#![allow(clippy::disallowed_methods)]

mod common;

use std::sync::Arc;

use batch::{RemoteBatchClient, SimulatedBatchClient};
use chrono::Utc;
use pipeline::{ResultAggregator, log_key};
use reading_core::{
    FailureClass, InputRef, JobDescriptor, JobRecord, JobState, ReaderName, ResourceSpec,
    RunOutcome,
};
use storage::{Storage, StorageConfig};

use common::run_id;

fn descriptor(run: &str, ix: usize, reader: ReaderName) -> JobDescriptor {
    JobDescriptor::new(
        run,
        format!("{}_{}_{}", run, ix, reader),
        reader,
        InputRef::Object {
            key: format!("in/{}", ix),
        },
        ResourceSpec::default(),
    )
}

fn finished(descriptor: &JobDescriptor, remote_id: String, state: JobState, reason: Option<&str>) -> JobRecord {
    let mut record = JobRecord::pending(descriptor.clone());
    record.remote_job_id = Some(remote_id);
    record.transition(JobState::Submitted, None).unwrap();
    record.transition(JobState::Running, None).unwrap();
    record
        .transition(state, reason.map(str::to_string))
        .unwrap();
    record
}

#[tokio::test]
async fn summary_classifies_failures_and_reports_missing_outputs() {
    let run = run_id("agg");
    let ok = descriptor(&run, 0, ReaderName::Reach);
    let crashed = descriptor(&run, 1, ReaderName::Sparser);
    let oom = descriptor(&run, 2, ReaderName::Reach);
    let empty = descriptor(&run, 3, ReaderName::Reach);
    let lost = descriptor(&run, 4, ReaderName::Isi);

    let client = Arc::new(
        SimulatedBatchClient::new()
            .with_logs(ok.name(), vec!["done".into()])
            .with_logs(
                crashed.name(),
                vec!["parsing".into(), "debugger invoked on a TYPE-ERROR".into()],
            )
            .with_logs(
                oom.name(),
                vec!["java.lang.OutOfMemoryError: GC overhead limit exceeded".into()],
            ),
    );
    let mut remote = Vec::new();
    for job in [&ok, &crashed, &oom, &empty] {
        remote.push(client.submit(job).await.unwrap().to_string());
    }

    let storage = Storage::new(StorageConfig::memory()).await.unwrap();
    storage.put_text(&ok.output_key(), "{}").await.unwrap();

    let records = vec![
        finished(&ok, remote[0].clone(), JobState::Succeeded, None),
        finished(&crashed, remote[1].clone(), JobState::Failed, Some("exit code 1")),
        finished(&oom, remote[2].clone(), JobState::TimedOut, Some("global timeout of 60 s")),
        finished(&empty, remote[3].clone(), JobState::Succeeded, None),
        finished(&lost, "sim-unknown".into(), JobState::Failed, Some("exit code 2")),
    ];

    let aggregator =
        ResultAggregator::new(client.clone(), storage.clone()).with_log_stash(true);
    let summary = aggregator
        .aggregate(&run, &records, RunOutcome::Completed, Utc::now())
        .await;

    assert_eq!(summary.total, 5);
    assert_eq!(summary.counts.succeeded, 2);
    assert_eq!(summary.counts.failed, 2);
    assert_eq!(summary.counts.timed_out, 1);
    assert_eq!(summary.counts.total(), summary.total);
    assert!(!summary.all_succeeded());

    let classes: Vec<(&str, FailureClass)> = summary
        .failures
        .iter()
        .map(|f| (f.job_name.as_str(), f.classification))
        .collect();
    assert_eq!(
        classes,
        [
            (crashed.name(), FailureClass::ReaderCrash),
            (oom.name(), FailureClass::ResourceExhausted),
            (lost.name(), FailureClass::Unclassified),
        ]
    );
    assert!(summary.failures[2].reason.contains("log fetch failed"));
    assert_eq!(summary.failures[1].state, JobState::TimedOut);

    assert_eq!(summary.missing_outputs.len(), 1);
    assert_eq!(summary.missing_outputs[0].job_name, empty.name());
    assert_eq!(summary.missing_outputs[0].output_key, empty.output_key());

    let crash_log = log_key(&records[1]);
    assert_eq!(crash_log, format!("logs/{}/FAILURE_{}.log", run, crashed.name()));
    assert!(storage.get_text(&crash_log).await.unwrap().contains("debugger invoked"));
    assert!(storage.exists(&log_key(&records[0])).await.unwrap());
    assert!(log_key(&records[2]).contains("/TIMED_OUT_"));
}

#[tokio::test]
async fn unstashable_log_keeps_success_clean() {
    let run = run_id("agg-stash");
    let ok = descriptor(&run, 0, ReaderName::Reach);
    let client = Arc::new(SimulatedBatchClient::new());
    let storage = Storage::new(StorageConfig::memory()).await.unwrap();
    storage.put_text(&ok.output_key(), "{}").await.unwrap();

    let record = finished(&ok, "sim-gone".into(), JobState::Succeeded, None);
    let summary = ResultAggregator::new(client, storage.clone())
        .with_log_stash(true)
        .aggregate(&run, std::slice::from_ref(&record), RunOutcome::Completed, Utc::now())
        .await;

    assert_eq!(summary.counts.succeeded, 1);
    assert!(summary.failures.is_empty());
    assert!(summary.missing_outputs.is_empty());
    assert!(summary.all_succeeded());
    assert!(!storage.exists(&log_key(&record)).await.unwrap());
}

#[tokio::test]
async fn empty_run_summarises_to_nothing() {
    let client = Arc::new(SimulatedBatchClient::new());
    let storage = Storage::new(StorageConfig::memory()).await.unwrap();
    let summary = ResultAggregator::new(client, storage)
        .aggregate("empty", &[], RunOutcome::Completed, Utc::now())
        .await;
    assert_eq!(summary.total, 0);
    assert!(summary.all_succeeded());
    assert_eq!(summary.success_rate(), None);
}
