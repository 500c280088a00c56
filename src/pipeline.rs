//! Dependency-Ordered Pipeline
//!
//! A small, statically known set of stages where later stages consume the
//! success payloads of earlier ones. Each stage runs in its own task; edges are
//! resolved through per-stage `watch` channels so no stage ever polls.
//!
//! - [`Dependency::Strict`]: the consumer waits for the producer without bound
//!   and is never dispatched unless the producer succeeded.
//! - [`Dependency::SoftWait`]: the consumer waits at most `wait`, counted from
//!   the moment the stage starts waiting; if the producer has not finished by
//!   then the consumer is abandoned with `Timeout`.
//!
//! All edges of a stage are awaited together, so declaration order never
//! changes the outcome.
//!
//! A producer that finished with a failure always yields `UpstreamFailed` for
//! its consumers, whichever edge type connects them.

use crate::batch::{collect_results, execute_job, unfinished_result, BatchReport, BatchRunner};
use crate::error::ForgeError;
use crate::job::{Job, JobFailure, JobId, JobKind, JobResult, Outcome, Payload, Priority, RemoteJob};
use futures::future::join_all;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Success payloads of a stage's producers, keyed by producer stage id.
pub type UpstreamOutputs = HashMap<String, Payload>;

type Derive = Box<dyn FnOnce(&UpstreamOutputs) -> Result<Arc<dyn RemoteJob>, JobFailure> + Send>;

/// Incoming edge of a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    Strict(String),
    SoftWait { producer: String, wait: Duration },
}

impl Dependency {
    pub fn producer(&self) -> &str {
        match self {
            Dependency::Strict(producer) => producer,
            Dependency::SoftWait { producer, .. } => producer,
        }
    }
}

enum StageWork {
    Ready(Arc<dyn RemoteJob>),
    /// Built from producer outputs once every dependency succeeded.
    Derived(Derive),
}

/// One pipeline stage.
pub struct Stage {
    pub id: String,
    pub job_id: JobId,
    pub kind: JobKind,
    pub priority: Priority,
    pub timeout: Option<Duration>,
    pub depends_on: Vec<Dependency>,
    work: StageWork,
}

impl Stage {
    /// Stage whose work is fixed up front.
    pub fn new(id: impl Into<String>, kind: JobKind, work: impl RemoteJob + 'static) -> Self {
        Self::with_work(id.into(), kind, StageWork::Ready(Arc::new(work)))
    }

    pub fn from_arc(id: impl Into<String>, kind: JobKind, work: Arc<dyn RemoteJob>) -> Self {
        Self::with_work(id.into(), kind, StageWork::Ready(work))
    }

    /// Stage whose job is built from its producers' payloads. A builder error
    /// becomes the stage's failure and nothing is dispatched.
    pub fn derived<F>(id: impl Into<String>, kind: JobKind, build: F) -> Self
    where
        F: FnOnce(&UpstreamOutputs) -> Result<Arc<dyn RemoteJob>, JobFailure> + Send + 'static,
    {
        Self::with_work(id.into(), kind, StageWork::Derived(Box::new(build)))
    }

    fn with_work(id: String, kind: JobKind, work: StageWork) -> Self {
        Self {
            id,
            job_id: JobId::next(),
            kind,
            priority: Priority::Normal,
            timeout: None,
            depends_on: Vec::new(),
            work,
        }
    }

    pub fn after(mut self, producer: impl Into<String>) -> Self {
        self.depends_on.push(Dependency::Strict(producer.into()));
        self
    }

    pub fn soft_after(mut self, producer: impl Into<String>, wait: Duration) -> Self {
        self.depends_on.push(Dependency::SoftWait {
            producer: producer.into(),
            wait,
        });
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Ordered stage list. Reports follow this order.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn push(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_ids(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.id.as_str()).collect()
    }

    /// Reject duplicate ids, unknown producers, self edges and cycles.
    pub fn validate(&self) -> Result<(), ForgeError> {
        let mut ids = HashSet::new();
        for stage in &self.stages {
            if stage.id.trim().is_empty() {
                return Err(ForgeError::InvalidPipeline(
                    "Stage id cannot be empty".to_string(),
                ));
            }
            if !ids.insert(stage.id.as_str()) {
                return Err(ForgeError::InvalidPipeline(format!(
                    "Duplicate stage id '{}'",
                    stage.id
                )));
            }
        }

        for stage in &self.stages {
            for dep in &stage.depends_on {
                let producer = dep.producer();
                if producer == stage.id {
                    return Err(ForgeError::InvalidPipeline(format!(
                        "Stage '{}' depends on itself",
                        stage.id
                    )));
                }
                if !ids.contains(producer) {
                    return Err(ForgeError::InvalidPipeline(format!(
                        "Stage '{}' depends on unknown stage '{}'",
                        stage.id, producer
                    )));
                }
            }
        }

        // Kahn's algorithm; anything left unvisited sits on a cycle.
        let mut indegree: HashMap<&str, usize> =
            self.stages.iter().map(|s| (s.id.as_str(), 0)).collect();
        let mut consumers: HashMap<&str, Vec<&str>> = HashMap::new();
        for stage in &self.stages {
            for dep in &stage.depends_on {
                *indegree.entry(stage.id.as_str()).or_insert(0) += 1;
                consumers
                    .entry(dep.producer())
                    .or_default()
                    .push(stage.id.as_str());
            }
        }
        let mut ready: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;
        while let Some(id) = ready.pop_front() {
            visited += 1;
            for consumer in consumers.get(id).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(consumer) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(*consumer);
                    }
                }
            }
        }
        if visited != self.stages.len() {
            let mut cyclic: Vec<&str> = indegree
                .into_iter()
                .filter(|(_, d)| *d > 0)
                .map(|(id, _)| id)
                .collect();
            cyclic.sort_unstable();
            return Err(ForgeError::InvalidPipeline(format!(
                "Dependency cycle among stages: {}",
                cyclic.join(", ")
            )));
        }
        Ok(())
    }
}

type Signal = Option<Arc<Outcome>>;

impl BatchRunner {
    /// Run every stage as soon as its dependencies allow and return one result
    /// per stage, in stage order.
    pub async fn run_pipeline(&self, pipeline: Pipeline) -> Result<BatchReport, ForgeError> {
        pipeline.validate()?;
        let started = Instant::now();
        let total = pipeline.stages.len();

        let mut senders: HashMap<String, watch::Sender<Signal>> = HashMap::new();
        let mut receivers: HashMap<String, watch::Receiver<Signal>> = HashMap::new();
        for stage in &pipeline.stages {
            let (tx, rx) = watch::channel(None);
            senders.insert(stage.id.clone(), tx);
            receivers.insert(stage.id.clone(), rx);
        }

        let headers: Vec<(JobId, String, JobKind)> = pipeline
            .stages
            .iter()
            .map(|s| (s.job_id, s.id.clone(), s.kind))
            .collect();
        let dispatched: Arc<Vec<AtomicBool>> =
            Arc::new((0..total).map(|_| AtomicBool::new(false)).collect());

        let mut join_set = JoinSet::new();
        for (index, stage) in pipeline.stages.into_iter().enumerate() {
            let Some(done) = senders.remove(&stage.id) else {
                continue;
            };
            let upstream: Vec<(Dependency, watch::Receiver<Signal>)> = stage
                .depends_on
                .iter()
                .filter_map(|dep| {
                    receivers
                        .get(dep.producer())
                        .map(|rx| (dep.clone(), rx.clone()))
                })
                .collect();
            let runner = self.clone();
            let dispatched = Arc::clone(&dispatched);
            join_set.spawn(async move {
                let result = run_stage(&runner, stage, upstream, || {
                    dispatched[index].store(true, Ordering::SeqCst)
                })
                .await;
                // Receivers may all be gone already; that is fine.
                let _ = done.send(Some(Arc::new(result.outcome.clone())));
                (index, result)
            });
        }
        drop(receivers);

        let (slots, deadline_exceeded) = collect_results(&mut join_set, total, self.deadline()).await;
        let results: Vec<JobResult> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    let (job_id, label, kind) = &headers[index];
                    unfinished_result(
                        *job_id,
                        label,
                        *kind,
                        dispatched[index].load(Ordering::SeqCst),
                        deadline_exceeded,
                        started,
                    )
                })
            })
            .collect();

        let mut report = BatchReport::from_results(results, started.elapsed());
        report.deadline_exceeded = deadline_exceeded;
        info!(
            stages = report.len(),
            succeeded = report.success_count,
            failed = report.failure_count,
            elapsed_ms = report.elapsed_ms,
            "Pipeline completed"
        );
        Ok(report)
    }
}

async fn run_stage(
    runner: &BatchRunner,
    stage: Stage,
    upstream: Vec<(Dependency, watch::Receiver<Signal>)>,
    on_dispatch: impl FnOnce(),
) -> JobResult {
    let started = Instant::now();
    let resolved = |outcome: Outcome| JobResult {
        job_id: stage.job_id,
        label: stage.id.clone(),
        kind: stage.kind,
        outcome,
        dispatched: false,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };

    // Soft-wait deadlines count from stage start, whatever the edge order.
    let wait_started = tokio::time::Instant::now();
    let waits = upstream.into_iter().map(move |(dep, mut rx)| async move {
        let waited = match &dep {
            Dependency::Strict(_) => Ok(rx.wait_for(Option::is_some).await.map(|v| (*v).clone())),
            Dependency::SoftWait { wait, .. } => {
                tokio::time::timeout_at(wait_started + *wait, rx.wait_for(Option::is_some))
                    .await
                    .map(|res| res.map(|v| (*v).clone()))
            }
        };
        (dep, waited)
    });
    let settled = join_all(waits).await;

    let mut outputs = UpstreamOutputs::new();
    for (dep, waited) in settled {
        let producer = dep.producer().to_string();
        let outcome = match waited {
            Ok(Ok(Some(outcome))) => outcome,
            Ok(Ok(None)) | Ok(Err(_)) => {
                return resolved(Outcome::failure(JobFailure::upstream(format!(
                    "stage '{}' ended without a result",
                    producer
                ))));
            }
            Err(_) => {
                let wait_ms = match &dep {
                    Dependency::SoftWait { wait, .. } => wait.as_millis(),
                    Dependency::Strict(_) => 0,
                };
                debug!(stage = %stage.id, producer = %producer, wait_ms, "Soft wait expired");
                return resolved(Outcome::failure(JobFailure::timeout(format!(
                    "stage '{}' did not complete within {}ms",
                    producer, wait_ms
                ))));
            }
        };
        match outcome.as_ref() {
            Outcome::Success { payload } => {
                outputs.insert(producer, payload.clone());
            }
            Outcome::Failure { failure } => {
                return resolved(Outcome::failure(JobFailure::upstream(format!(
                    "stage '{}' failed ({})",
                    producer, failure
                ))));
            }
        }
    }

    let work = match stage.work {
        StageWork::Ready(work) => work,
        StageWork::Derived(build) => match build(&outputs) {
            Ok(work) => work,
            Err(failure) => return resolved(Outcome::failure(failure)),
        },
    };

    let job = Job {
        id: stage.job_id,
        kind: stage.kind,
        label: stage.id.clone(),
        priority: stage.priority,
        timeout: stage.timeout,
        work,
    };
    let timeout = runner.timeout_for(&job);
    execute_job(runner.dispatcher(), &job, timeout, on_dispatch).await
}
