//! Fan-Out/Fan-In Batch Runner
//!
//! Launches every job of a batch as its own tokio task, gated by the per-kind
//! [`Dispatcher`], and collects exactly one [`JobResult`] per submitted job in
//! submission order. A job failure, timeout or panic only ever shows up as that
//! job's outcome.

use crate::config::TimeoutConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ForgeError, StorageError};
use crate::job::{ErrorKind, Job, JobFailure, JobId, JobKind, JobResult, Outcome, Payload};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Saved artifact of a successful job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedOutput {
    pub job_id: JobId,
    pub path: PathBuf,
}

/// A job that succeeded remotely but whose payload could not be saved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistenceFailure {
    pub job_id: JobId,
    pub message: String,
}

/// Structured report returned for every batch, including partial ones.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// One entry per submitted job, in submission order.
    pub results: Vec<JobResult>,
    pub success_count: usize,
    pub failure_count: usize,
    pub persisted: Vec<PersistedOutput>,
    /// Save failures are tracked here; the job outcome stays `Success`.
    pub persistence_failures: Vec<PersistenceFailure>,
    pub deadline_exceeded: bool,
    pub elapsed_ms: u64,
}

impl BatchReport {
    pub fn from_results(results: Vec<JobResult>, elapsed: Duration) -> Self {
        let success_count = results.iter().filter(|r| r.is_success()).count();
        let failure_count = results.len() - success_count;
        Self {
            results,
            success_count,
            failure_count,
            persisted: Vec::new(),
            persistence_failures: Vec::new(),
            deadline_exceeded: false,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failure_count == 0
    }

    pub fn get(&self, job_id: JobId) -> Option<&JobResult> {
        self.results.iter().find(|r| r.job_id == job_id)
    }

    /// First result carrying `label`.
    pub fn by_label(&self, label: &str) -> Option<&JobResult> {
        self.results.iter().find(|r| r.label == label)
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn failures_by_kind(&self) -> HashMap<ErrorKind, usize> {
        let mut counts = HashMap::new();
        for failure in self.failures().filter_map(|r| r.failure()) {
            *counts.entry(failure.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Save every successful payload through `sink`. Save errors are recorded
    /// separately and never change a job outcome.
    pub fn persist_with(&mut self, sink: &dyn ResultSink) {
        self.persist_matching(sink, |_| true);
    }

    /// Like [`persist_with`](Self::persist_with), restricted to the results
    /// `select` accepts (e.g. only the final stage of each pipeline chain).
    pub fn persist_matching(&mut self, sink: &dyn ResultSink, select: impl Fn(&JobResult) -> bool) {
        for result in self.results.iter().filter(|r| select(r)) {
            let Some(payload) = result.payload() else {
                continue;
            };
            match sink.persist(result, payload) {
                Ok(path) => self.persisted.push(PersistedOutput {
                    job_id: result.job_id,
                    path,
                }),
                Err(err) => {
                    error!(job_id = %result.job_id, label = %result.label, error = %err, "Failed to persist job output");
                    self.persistence_failures.push(PersistenceFailure {
                        job_id: result.job_id,
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    pub fn has_persistence_failures(&self) -> bool {
        !self.persistence_failures.is_empty()
    }
}

/// Destination for successful payloads.
pub trait ResultSink: Send + Sync {
    fn persist(&self, result: &JobResult, payload: &Payload) -> Result<PathBuf, StorageError>;
}

/// Runs batches against a shared dispatcher.
#[derive(Clone)]
pub struct BatchRunner {
    dispatcher: Arc<Dispatcher>,
    timeouts: TimeoutConfig,
    deadline: Option<Duration>,
}

impl BatchRunner {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            timeouts: TimeoutConfig::default(),
            deadline: None,
        }
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Overall bound for a batch. Jobs still pending at expiry are cancelled
    /// and reported as `Timeout`.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    pub(crate) fn timeout_for(&self, job: &Job) -> Duration {
        job.timeout.unwrap_or_else(|| self.timeouts.for_kind(job.kind))
    }

    /// Run all jobs concurrently and return one result per job, in input order.
    ///
    /// Errors only for malformed input (duplicate job ids).
    pub async fn run_batch(&self, jobs: Vec<Job>) -> Result<BatchReport, ForgeError> {
        let mut seen = HashSet::with_capacity(jobs.len());
        for job in &jobs {
            if !seen.insert(job.id) {
                return Err(ForgeError::InvalidBatch(format!(
                    "Duplicate job id {} ({})",
                    job.id, job.label
                )));
            }
        }

        let started = Instant::now();
        let total = jobs.len();
        let dispatched: Arc<Vec<AtomicBool>> =
            Arc::new((0..total).map(|_| AtomicBool::new(false)).collect());

        // Spawn order follows priority. Only a hint once worker threads steal tasks.
        let mut order: Vec<usize> = (0..total).collect();
        order.sort_by(|a, b| jobs[*b].priority.cmp(&jobs[*a].priority));

        let mut join_set = JoinSet::new();
        for index in order {
            let job = jobs[index].clone();
            let timeout = self.timeout_for(&job);
            let dispatcher = Arc::clone(&self.dispatcher);
            let dispatched = Arc::clone(&dispatched);
            join_set.spawn(async move {
                let result = execute_job(&dispatcher, &job, timeout, || {
                    dispatched[index].store(true, Ordering::SeqCst)
                })
                .await;
                (index, result)
            });
        }

        let (slots, deadline_exceeded) = collect_results(&mut join_set, total, self.deadline).await;

        let results: Vec<JobResult> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    let job = &jobs[index];
                    unfinished_result(
                        job.id,
                        &job.label,
                        job.kind,
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
            total = report.len(),
            succeeded = report.success_count,
            failed = report.failure_count,
            elapsed_ms = report.elapsed_ms,
            "Batch completed"
        );
        Ok(report)
    }

    /// Run a batch and save every successful payload through `sink`.
    pub async fn run_and_persist(
        &self,
        jobs: Vec<Job>,
        sink: &dyn ResultSink,
    ) -> Result<BatchReport, ForgeError> {
        let mut report = self.run_batch(jobs).await?;
        report.persist_with(sink);
        Ok(report)
    }
}

/// Fresh copies (new ids) of the jobs whose failure kind is retryable.
/// Retrying stays an explicit caller decision.
pub fn retryable_jobs(jobs: &[Job], report: &BatchReport) -> Vec<Job> {
    jobs.iter()
        .filter(|job| {
            report
                .get(job.id)
                .and_then(|r| r.failure())
                .is_some_and(|f| f.kind.is_retryable())
        })
        .map(Job::retry)
        .collect()
}

/// Drain `join_set` into index-addressed slots. On deadline expiry the
/// remaining tasks are aborted and their slots stay empty.
pub(crate) async fn collect_results(
    join_set: &mut JoinSet<(usize, JobResult)>,
    total: usize,
    deadline: Option<Duration>,
) -> (Vec<Option<JobResult>>, bool) {
    let mut slots: Vec<Option<JobResult>> = vec![None; total];
    let deadline_at = deadline.map(|d| tokio::time::Instant::now() + d);
    let mut deadline_exceeded = false;
    loop {
        let next = match deadline_at {
            Some(at) => match tokio::time::timeout_at(at, join_set.join_next()).await {
                Ok(next) => next,
                Err(_) => {
                    deadline_exceeded = true;
                    break;
                }
            },
            None => join_set.join_next().await,
        };
        match next {
            Some(Ok((index, result))) => slots[index] = Some(result),
            Some(Err(err)) => warn!(error = %err, "Task ended without a result"),
            None => break,
        }
    }

    if deadline_exceeded {
        // Aborting drops the in-flight futures, which cancels their requests
        // and releases their dispatch permits.
        join_set.shutdown().await;
        warn!(
            pending = slots.iter().filter(|s| s.is_none()).count(),
            "Deadline exceeded"
        );
    }
    (slots, deadline_exceeded)
}

/// Result for a job whose task never reported back.
pub(crate) fn unfinished_result(
    job_id: JobId,
    label: &str,
    kind: JobKind,
    dispatched: bool,
    deadline_exceeded: bool,
    started: Instant,
) -> JobResult {
    let failure = if deadline_exceeded {
        JobFailure::timeout("batch deadline exceeded")
    } else {
        JobFailure::internal("job task ended without a result")
    };
    JobResult {
        job_id,
        label: label.to_string(),
        kind,
        outcome: Outcome::failure(failure),
        dispatched,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

/// Acquire a slot for the job's kind, run it under `timeout` and turn panics
/// into `Internal` failures. `on_dispatch` fires once the slot is held.
pub(crate) async fn execute_job(
    dispatcher: &Dispatcher,
    job: &Job,
    timeout: Duration,
    on_dispatch: impl FnOnce(),
) -> JobResult {
    let started = Instant::now();
    let permit = match dispatcher.acquire(job.kind).await {
        Ok(permit) => permit,
        Err(err) => {
            return JobResult {
                job_id: job.id,
                label: job.label.clone(),
                kind: job.kind,
                outcome: Outcome::failure(JobFailure::internal(err.to_string())),
                dispatched: false,
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
        }
    };
    on_dispatch();

    let work = Arc::clone(&job.work);
    let guarded = AssertUnwindSafe(async move { work.execute().await }).catch_unwind();
    let outcome = match tokio::time::timeout(timeout, guarded).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(panic)) => Outcome::failure(JobFailure::internal(format!(
            "job panicked: {}",
            panic_message(panic.as_ref())
        ))),
        Err(_) => Outcome::failure(JobFailure::timeout(format!(
            "{} job exceeded {}ms",
            job.kind,
            timeout.as_millis()
        ))),
    };
    drop(permit);

    log_completion(job.kind, job, &outcome, started);
    JobResult {
        job_id: job.id,
        label: job.label.clone(),
        kind: job.kind,
        outcome,
        dispatched: true,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

fn log_completion(kind: JobKind, job: &Job, outcome: &Outcome, started: Instant) {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Outcome::Success { .. } => {
            debug!(job_id = %job.id, label = %job.label, kind = %kind, elapsed_ms, "Job succeeded")
        }
        Outcome::Failure { failure } => warn!(
            job_id = %job.id,
            label = %job.label,
            kind = %kind,
            error_kind = %failure.kind,
            error = %failure.message,
            elapsed_ms,
            "Job failed"
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
