//! Fan-out/fan-in: ordering, failure isolation, deadlines and panics.

use crate::integration::test_utils::Gauge;
use async_trait::async_trait;
use gamiforge::batch::{retryable_jobs, BatchRunner};
use gamiforge::dispatch::{DispatchConfig, Dispatcher};
use gamiforge::error::ForgeError;
use gamiforge::job::{ErrorKind, Job, JobFailure, JobKind, Outcome, RemoteJob};
use std::sync::Arc;
use std::time::Duration;

fn runner(cap: usize) -> BatchRunner {
    BatchRunner::new(Arc::new(Dispatcher::new(&DispatchConfig::uniform(cap))))
}

struct Panicking;

#[async_trait]
impl RemoteJob for Panicking {
    async fn execute(&self) -> Outcome {
        panic!("provider adapter bug");
    }
}

#[tokio::test]
async fn test_results_follow_submission_order() {
    let gauge = Gauge::default();
    // Later jobs finish first.
    let jobs: Vec<Job> = (0..5u64)
        .map(|i| {
            Job::new(
                JobKind::Text,
                format!("job-{}", i),
                gauge.ok_job(Duration::from_millis(100 - i * 20), &format!("out-{}", i)),
            )
        })
        .collect();
    let ids: Vec<_> = jobs.iter().map(|j| j.id).collect();

    let report = runner(5).run_batch(jobs).await.unwrap();

    assert_eq!(report.len(), 5);
    assert_eq!(report.results.iter().map(|r| r.job_id).collect::<Vec<_>>(), ids);
    for (i, result) in report.results.iter().enumerate() {
        assert_eq!(
            result.payload().and_then(|p| p.as_text()),
            Some(format!("out-{}", i).as_str())
        );
    }
}

#[tokio::test]
async fn test_one_failure_does_not_affect_siblings() {
    let gauge = Gauge::default();
    let jobs = vec![
        Job::new(JobKind::Audio, "a", gauge.ok_job(Duration::from_millis(10), "a")),
        Job::new(
            JobKind::Audio,
            "b",
            gauge.failing_job(Duration::from_millis(5), JobFailure::transport("503")),
        ),
        Job::new(JobKind::Audio, "c", gauge.ok_job(Duration::from_millis(20), "c")),
    ];

    let report = runner(3).run_batch(jobs).await.unwrap();

    assert_eq!(report.success_count, 2);
    assert_eq!(report.failure_count, 1);
    assert_eq!(report.by_label("b").unwrap().failure().unwrap().kind, ErrorKind::Transport);
    assert!(report.by_label("a").unwrap().is_success());
    assert!(report.by_label("c").unwrap().is_success());
    assert_eq!(gauge.calls(), 3);
}

#[tokio::test]
async fn test_panic_becomes_internal_failure() {
    let gauge = Gauge::default();
    let jobs = vec![
        Job::new(JobKind::Image, "bad", Panicking),
        Job::new(JobKind::Image, "good", gauge.ok_job(Duration::from_millis(5), "ok")),
    ];

    let report = runner(2).run_batch(jobs).await.unwrap();

    let bad = report.by_label("bad").unwrap();
    assert_eq!(bad.failure().unwrap().kind, ErrorKind::Internal);
    assert!(bad.failure().unwrap().message.contains("provider adapter bug"));
    assert!(report.by_label("good").unwrap().is_success());
}

#[tokio::test]
async fn test_job_timeout_is_reported() {
    let gauge = Gauge::default();
    let jobs = vec![Job::new(JobKind::Text, "slow", gauge.ok_job(Duration::from_secs(5), "late"))
        .with_timeout(Duration::from_millis(50))];

    let report = runner(1).run_batch(jobs).await.unwrap();

    let slow = report.by_label("slow").unwrap();
    assert_eq!(slow.failure().unwrap().kind, ErrorKind::Timeout);
    assert!(slow.dispatched);
}

#[tokio::test]
async fn test_deadline_cancels_outstanding_jobs() {
    let gauge = Gauge::default();
    let jobs = vec![
        Job::new(JobKind::Text, "fast", gauge.ok_job(Duration::from_millis(10), "done")),
        Job::new(JobKind::Text, "slow", gauge.ok_job(Duration::from_secs(10), "never")),
    ];

    let report = runner(2)
        .with_deadline(Some(Duration::from_millis(200)))
        .run_batch(jobs)
        .await
        .unwrap();

    assert!(report.deadline_exceeded);
    assert_eq!(report.len(), 2);
    assert!(report.by_label("fast").unwrap().is_success());
    assert_eq!(
        report.by_label("slow").unwrap().failure().unwrap().kind,
        ErrorKind::Timeout
    );
}

#[tokio::test]
async fn test_empty_batch() {
    let report = runner(1).run_batch(Vec::new()).await.unwrap();
    assert!(report.is_empty());
    assert!(report.all_succeeded());
}

#[tokio::test]
async fn test_duplicate_job_ids_are_rejected() {
    let gauge = Gauge::default();
    let job = Job::new(JobKind::Text, "dup", gauge.ok_job(Duration::ZERO, "x"));
    let result = runner(1).run_batch(vec![job.clone(), job]).await;
    assert!(matches!(result, Err(ForgeError::InvalidBatch(_))));
    assert_eq!(gauge.calls(), 0);
}

#[tokio::test]
async fn test_retryable_jobs_selects_transport_and_timeout() {
    let gauge = Gauge::default();
    let jobs = vec![
        Job::new(
            JobKind::Audio,
            "transport",
            gauge.failing_job(Duration::ZERO, JobFailure::transport("429")),
        ),
        Job::new(
            JobKind::Audio,
            "validation",
            gauge.failing_job(Duration::ZERO, JobFailure::validation("bad header")),
        ),
        Job::new(JobKind::Audio, "ok", gauge.ok_job(Duration::ZERO, "fine")),
    ];

    let report = runner(3).run_batch(jobs.clone()).await.unwrap();
    let retries = retryable_jobs(&jobs, &report);

    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].label, "transport");
    assert_ne!(retries[0].id, jobs[0].id);
}
