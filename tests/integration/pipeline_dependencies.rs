//! Strict and soft-wait edges between pipeline stages.

use crate::integration::test_utils::Gauge;
use gamiforge::batch::BatchRunner;
use gamiforge::dispatch::{DispatchConfig, Dispatcher};
use gamiforge::error::ForgeError;
use gamiforge::job::{ErrorKind, FnJob, JobFailure, JobKind, Outcome, Payload, RemoteJob};
use gamiforge::pipeline::{Pipeline, Stage};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn runner() -> BatchRunner {
    BatchRunner::new(Arc::new(Dispatcher::new(&DispatchConfig::uniform(4))))
}

#[tokio::test]
async fn test_consumer_never_dispatched_after_producer_failure() {
    let producer = Gauge::default();
    let consumer = Gauge::default();
    let pipeline = Pipeline::new()
        .stage(Stage::new(
            "player.base",
            JobKind::Image,
            producer.failing_job(Duration::from_millis(10), JobFailure::transport("502")),
        ))
        .stage(
            Stage::new(
                "player.final",
                JobKind::Image,
                consumer.ok_job(Duration::ZERO, "sprite"),
            )
            .after("player.base"),
        );

    let report = runner().run_pipeline(pipeline).await.unwrap();

    assert_eq!(consumer.calls(), 0);
    let result = report.by_label("player.final").unwrap();
    assert_eq!(result.failure().unwrap().kind, ErrorKind::UpstreamFailed);
    assert!(!result.dispatched);
    assert!(result.failure().unwrap().message.contains("player.base"));
}

#[tokio::test]
async fn test_upstream_failure_propagates_down_a_chain() {
    let gauge = Gauge::default();
    let pipeline = Pipeline::new()
        .stage(Stage::new(
            "a",
            JobKind::Text,
            gauge.failing_job(Duration::ZERO, JobFailure::validation("bad")),
        ))
        .stage(Stage::new("b", JobKind::Text, gauge.ok_job(Duration::ZERO, "b")).after("a"))
        .stage(Stage::new("c", JobKind::Text, gauge.ok_job(Duration::ZERO, "c")).after("b"));

    let report = runner().run_pipeline(pipeline).await.unwrap();

    assert_eq!(gauge.calls(), 1);
    assert_eq!(report.failure_count, 3);
    assert_eq!(report.by_label("c").unwrap().failure().unwrap().kind, ErrorKind::UpstreamFailed);
}

#[tokio::test]
async fn test_soft_wait_expiry_is_bounded() {
    let producer = Gauge::default();
    let consumer = Gauge::default();
    let wait = Duration::from_millis(200);
    let pipeline = Pipeline::new()
        .stage(Stage::new(
            "object.config",
            JobKind::Text,
            producer.ok_job(Duration::from_secs(3), "late"),
        ))
        .stage(
            Stage::new(
                "object.spawn",
                JobKind::Text,
                consumer.ok_job(Duration::ZERO, "spawn"),
            )
            .soft_after("object.config", wait),
        );

    let started = Instant::now();
    let runner = runner().with_deadline(Some(Duration::from_millis(wait.as_millis() as u64 + 500)));
    let report = runner.run_pipeline(pipeline).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed < wait + Duration::from_millis(700), "took {:?}", elapsed);
    let spawn = report.by_label("object.spawn").unwrap();
    assert_eq!(spawn.failure().unwrap().kind, ErrorKind::Timeout);
    assert!(!spawn.dispatched);
    assert_eq!(consumer.calls(), 0);
}

#[tokio::test]
async fn test_soft_wait_consumes_output_in_time() {
    let pipeline = Pipeline::new()
        .stage(Stage::new(
            "world.config",
            JobKind::Text,
            FnJob::new(|| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Outcome::success(Payload::Text("forest".to_string()))
            }),
        ))
        .stage(
            Stage::derived("world.ground", JobKind::Image, |upstream| {
                let theme = upstream
                    .get("world.config")
                    .and_then(|p| p.as_text())
                    .unwrap_or_default()
                    .to_string();
                let job = FnJob::new(move || {
                    let theme = theme.clone();
                    async move { Outcome::success(Payload::Text(format!("{} ground", theme))) }
                });
                Ok(Arc::new(job) as Arc<dyn RemoteJob>)
            })
            .soft_after("world.config", Duration::from_secs(2)),
        );

    let report = runner().run_pipeline(pipeline).await.unwrap();

    assert!(report.all_succeeded());
    assert_eq!(
        report.by_label("world.ground").unwrap().payload().unwrap().as_text(),
        Some("forest ground")
    );
}

#[tokio::test]
async fn test_soft_wait_producer_failure_is_upstream_failed() {
    let gauge = Gauge::default();
    let pipeline = Pipeline::new()
        .stage(Stage::new(
            "p",
            JobKind::Text,
            gauge.failing_job(Duration::from_millis(10), JobFailure::transport("down")),
        ))
        .stage(
            Stage::new("c", JobKind::Text, gauge.ok_job(Duration::ZERO, "c"))
                .soft_after("p", Duration::from_secs(2)),
        );

    let report = runner().run_pipeline(pipeline).await.unwrap();

    assert_eq!(
        report.by_label("c").unwrap().failure().unwrap().kind,
        ErrorKind::UpstreamFailed
    );
}

fn mixed_edges(soft_first: bool, wait: Duration) -> Pipeline {
    let gauge = Gauge::default();
    let consumer = Stage::new("c", JobKind::Text, gauge.ok_job(Duration::ZERO, "c"));
    let consumer = if soft_first {
        consumer.soft_after("b", wait).after("a")
    } else {
        consumer.after("a").soft_after("b", wait)
    };
    Pipeline::new()
        .stage(Stage::new("a", JobKind::Text, gauge.ok_job(Duration::from_millis(300), "a")))
        .stage(Stage::new("b", JobKind::Text, gauge.ok_job(Duration::from_millis(300), "b")))
        .stage(consumer)
}

#[tokio::test]
async fn test_soft_wait_bound_ignores_edge_order() {
    for soft_first in [false, true] {
        let report = runner()
            .run_pipeline(mixed_edges(soft_first, Duration::from_millis(100)))
            .await
            .unwrap();
        let c = report.by_label("c").unwrap();
        assert_eq!(
            c.failure().map(|f| f.kind),
            Some(ErrorKind::Timeout),
            "soft_first = {}",
            soft_first
        );
        assert!(!c.dispatched);
    }

    for soft_first in [false, true] {
        let report = runner()
            .run_pipeline(mixed_edges(soft_first, Duration::from_secs(2)))
            .await
            .unwrap();
        assert!(report.all_succeeded(), "soft_first = {}", soft_first);
    }
}

#[tokio::test]
async fn test_independent_stages_run_concurrently() {
    let gauge = Gauge::default();
    let pipeline = Pipeline::new()
        .stage(Stage::new("a", JobKind::Image, gauge.ok_job(Duration::from_millis(100), "a")))
        .stage(Stage::new("b", JobKind::Image, gauge.ok_job(Duration::from_millis(100), "b")))
        .stage(Stage::new("c", JobKind::Audio, gauge.ok_job(Duration::from_millis(100), "c")));

    let started = Instant::now();
    let report = runner().run_pipeline(pipeline).await.unwrap();

    assert!(report.all_succeeded());
    assert!(gauge.peak() >= 2);
    assert!(started.elapsed() < Duration::from_millis(280));
}

#[tokio::test]
async fn test_builder_error_fails_stage_without_dispatch() {
    let pipeline = Pipeline::new()
        .stage(Stage::new(
            "base",
            JobKind::Image,
            FnJob::new(|| async { Outcome::success(Payload::Text("not an image".to_string())) }),
        ))
        .stage(
            Stage::derived("final", JobKind::Image, |upstream| {
                match upstream.get("base").and_then(|p| p.as_media()) {
                    Some(_) => Ok(Arc::new(FnJob::new(|| async {
                        Outcome::success(Payload::Text("cut out".to_string()))
                    })) as Arc<dyn RemoteJob>),
                    None => Err(JobFailure::validation("upstream payload is not media")),
                }
            })
            .after("base"),
        );

    let report = runner().run_pipeline(pipeline).await.unwrap();

    let last = report.by_label("final").unwrap();
    assert_eq!(last.failure().unwrap().kind, ErrorKind::Validation);
    assert!(!last.dispatched);
}

#[tokio::test]
async fn test_cycle_is_rejected() {
    let gauge = Gauge::default();
    let pipeline = Pipeline::new()
        .stage(Stage::new("a", JobKind::Text, gauge.ok_job(Duration::ZERO, "a")).after("b"))
        .stage(Stage::new("b", JobKind::Text, gauge.ok_job(Duration::ZERO, "b")).after("a"));

    let result = runner().run_pipeline(pipeline).await;

    assert!(matches!(result, Err(ForgeError::InvalidPipeline(_))));
    assert_eq!(gauge.calls(), 0);
}
