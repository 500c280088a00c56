//! Remote Jobs
//!
//! A job is one unit of delegated remote work: it calls a single external endpoint and
//! converts whatever comes back into exactly one typed [`Outcome`]. Jobs never touch
//! shared state; persisting a successful payload is the caller's concern.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Job identifier. Retries get a fresh id; an id is never reissued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    /// Generate the next job ID
    pub fn next() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        JobId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Category of a job; selects its concurrency cap and default timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// LLM text or structured-output completion (config sections, prompts)
    Text,
    /// LLM call over an image (state analysis)
    Vision,
    /// Image generation, edit, background removal, outpainting
    Image,
    /// Text-to-audio generation
    Audio,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [JobKind::Text, JobKind::Vision, JobKind::Image, JobKind::Audio];

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Text => "text",
            JobKind::Vision => "vision",
            JobKind::Image => "image",
            JobKind::Audio => "audio",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best-effort ordering hint. A batch spawns higher priorities first, so on a
/// current-thread runtime they reach the dispatcher first. A multi-thread
/// runtime may poll freshly spawned tasks in any order; nothing depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Urgent = 3,
}

/// Binary media returned by a media endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Media {
    pub content_type: String,
    #[serde(skip_serializing)]
    pub bytes: Vec<u8>,
    pub size: usize,
}

impl Media {
    pub fn new(content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        let size = bytes.len();
        Self {
            content_type: content_type.into(),
            bytes,
            size,
        }
    }

    /// File extension matching the content type.
    pub fn extension(&self) -> &'static str {
        let ct = self.content_type.to_ascii_lowercase();
        if ct.contains("wav") {
            "wav"
        } else if ct.contains("png") {
            "png"
        } else if ct.contains("jpeg") || ct.contains("jpg") {
            "jpg"
        } else if ct.contains("webp") {
            "webp"
        } else {
            "bin"
        }
    }
}

/// Success payload of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Json(serde_json::Value),
    Text(String),
    Media(Media),
}

impl Payload {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_media(&self) -> Option<&Media> {
        match self {
            Payload::Media(m) => Some(m),
            _ => None,
        }
    }
}

/// Failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network failure or a retryable status (408, 429, 5xx)
    Transport,
    /// Response received but failed content-type, signature or shape checks
    Validation,
    /// A producer this job depended on did not succeed; the job was never dispatched
    UpstreamFailed,
    /// Per-job timeout, soft-wait bound or batch deadline exceeded
    Timeout,
    /// The job panicked
    Internal,
}

impl ErrorKind {
    /// Whether resubmitting the same request can reasonably succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transport | ErrorKind::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Validation => "validation",
            ErrorKind::UpstreamFailed => "upstream_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Typed failure of a single job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamFailed, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result of executing one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { payload: Payload },
    Failure { failure: JobFailure },
}

impl Outcome {
    pub fn success(payload: Payload) -> Self {
        Outcome::Success { payload }
    }

    pub fn failure(failure: JobFailure) -> Self {
        Outcome::Failure { failure }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Outcome::Success { payload } => Some(payload),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn failure_ref(&self) -> Option<&JobFailure> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { failure } => Some(failure),
        }
    }
}

impl From<Result<Payload, JobFailure>> for Outcome {
    fn from(result: Result<Payload, JobFailure>) -> Self {
        match result {
            Ok(payload) => Outcome::success(payload),
            Err(failure) => Outcome::failure(failure),
        }
    }
}

/// One external call. Implementations must convert every error into a
/// [`JobFailure`] and must not mutate shared state.
#[async_trait]
pub trait RemoteJob: Send + Sync {
    async fn execute(&self) -> Outcome;
}

/// A job as submitted to the runner. Immutable once built.
#[derive(Clone)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub label: String,
    pub priority: Priority,
    /// Per-job bound; `None` falls back to the runner's per-kind default.
    pub timeout: Option<Duration>,
    pub(crate) work: Arc<dyn RemoteJob>,
}

impl Job {
    pub fn new(kind: JobKind, label: impl Into<String>, work: impl RemoteJob + 'static) -> Self {
        Self::from_arc(kind, label, Arc::new(work))
    }

    pub fn from_arc(kind: JobKind, label: impl Into<String>, work: Arc<dyn RemoteJob>) -> Self {
        Self {
            id: JobId::next(),
            kind,
            label: label.into(),
            priority: Priority::Normal,
            timeout: None,
            work,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Same work under a new id, used for caller-driven retries.
    pub fn retry(&self) -> Self {
        Self {
            id: JobId::next(),
            kind: self.kind,
            label: self.label.clone(),
            priority: self.priority,
            timeout: self.timeout,
            work: Arc::clone(&self.work),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Exactly one per submitted job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub label: String,
    pub kind: JobKind,
    pub outcome: Outcome,
    /// False when the job was resolved without calling `execute` (upstream
    /// failure, soft-wait expiry, deadline before start).
    pub dispatched: bool,
    pub elapsed_ms: u64,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.outcome.payload()
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        self.outcome.failure_ref()
    }
}

/// Adapter for jobs defined by an async closure. Handy for composite work and tests.
pub struct FnJob<F>(F);

impl<F, Fut> FnJob<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Outcome> + Send,
{
    pub fn new(f: F) -> Self {
        FnJob(f)
    }
}

#[async_trait]
impl<F, Fut> RemoteJob for FnJob<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Outcome> + Send,
{
    async fn execute(&self) -> Outcome {
        (self.0)().await
    }
}
