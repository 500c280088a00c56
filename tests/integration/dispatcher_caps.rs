//! Per-kind caps hold under load and kinds do not share slots.

use crate::integration::test_utils::Gauge;
use gamiforge::batch::BatchRunner;
use gamiforge::dispatch::{DispatchConfig, Dispatcher};
use gamiforge::job::{Job, JobKind};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cap_bounds_concurrency() {
    let dispatcher = Arc::new(Dispatcher::new(
        &DispatchConfig::uniform(8).with_cap(JobKind::Audio, 3),
    ));
    let runner = BatchRunner::new(Arc::clone(&dispatcher));
    let gauge = Gauge::default();
    let jobs = (0..10)
        .map(|i| {
            Job::new(
                JobKind::Audio,
                format!("sound-{}", i),
                gauge.ok_job(Duration::from_millis(40), "wav"),
            )
        })
        .collect();

    let report = runner.run_batch(jobs).await.unwrap();

    assert_eq!(report.success_count, 10);
    assert!(gauge.peak() <= 3, "observed {} concurrent jobs", gauge.peak());
    assert!(dispatcher.peak(JobKind::Audio) <= 3);
    assert_eq!(dispatcher.in_flight(JobKind::Audio), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_kinds_are_limited_independently() {
    let dispatcher = Arc::new(Dispatcher::new(
        &DispatchConfig::uniform(1).with_cap(JobKind::Text, 4),
    ));
    let runner = BatchRunner::new(Arc::clone(&dispatcher));
    let text = Gauge::default();
    let image = Gauge::default();

    let mut jobs = Vec::new();
    for i in 0..4 {
        jobs.push(Job::new(
            JobKind::Text,
            format!("text-{}", i),
            text.ok_job(Duration::from_millis(60), "t"),
        ));
        jobs.push(Job::new(
            JobKind::Image,
            format!("image-{}", i),
            image.ok_job(Duration::from_millis(20), "i"),
        ));
    }

    let report = runner.run_batch(jobs).await.unwrap();

    assert!(report.all_succeeded());
    assert_eq!(image.peak(), 1);
    assert!(text.peak() <= 4);
    // The single image slot does not hold back text jobs.
    assert!(text.peak() >= 2);
}

#[tokio::test]
async fn test_min_interval_spaces_starts() {
    let mut config = DispatchConfig::uniform(4);
    config.min_interval_ms.insert("image".to_string(), 50);
    let runner = BatchRunner::new(Arc::new(Dispatcher::new(&config)));
    let gauge = Gauge::default();
    let jobs = (0..3)
        .map(|i| Job::new(JobKind::Image, format!("img-{}", i), gauge.ok_job(Duration::ZERO, "x")))
        .collect();

    let started = std::time::Instant::now();
    let report = runner.run_batch(jobs).await.unwrap();

    assert!(report.all_succeeded());
    assert!(started.elapsed() >= Duration::from_millis(100));
}
