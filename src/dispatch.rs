//! Rate-Limited Dispatcher
//!
//! Caps the number of in-flight jobs per [`JobKind`]. Each kind owns its own
//! semaphore, so saturating one kind never blocks another. A slot is held by a
//! [`DispatchPermit`] and released when the permit is dropped, which also covers
//! failures, timeouts, panics and task cancellation.

use crate::error::ForgeError;
use crate::job::JobKind;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::sleep;
use tracing::debug;

/// Per-kind concurrency caps and optional start spacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_text_cap")]
    pub text: usize,
    #[serde(default = "default_vision_cap")]
    pub vision: usize,
    #[serde(default = "default_image_cap")]
    pub image: usize,
    #[serde(default = "default_audio_cap")]
    pub audio: usize,
    /// Minimum delay between two job starts of the same kind, keyed by kind name (milliseconds)
    #[serde(default)]
    pub min_interval_ms: HashMap<String, u64>,
}

fn default_text_cap() -> usize {
    8
}

fn default_vision_cap() -> usize {
    8
}

fn default_image_cap() -> usize {
    6
}

fn default_audio_cap() -> usize {
    3
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            text: default_text_cap(),
            vision: default_vision_cap(),
            image: default_image_cap(),
            audio: default_audio_cap(),
            min_interval_ms: HashMap::new(),
        }
    }
}

impl DispatchConfig {
    pub fn cap(&self, kind: JobKind) -> usize {
        match kind {
            JobKind::Text => self.text,
            JobKind::Vision => self.vision,
            JobKind::Image => self.image,
            JobKind::Audio => self.audio,
        }
    }

    /// Same caps for every kind; convenient for tests.
    pub fn uniform(cap: usize) -> Self {
        Self {
            text: cap,
            vision: cap,
            image: cap,
            audio: cap,
            min_interval_ms: HashMap::new(),
        }
    }

    pub fn with_cap(mut self, kind: JobKind, cap: usize) -> Self {
        match kind {
            JobKind::Text => self.text = cap,
            JobKind::Vision => self.vision = cap,
            JobKind::Image => self.image = cap,
            JobKind::Audio => self.audio = cap,
        }
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        for kind in JobKind::ALL {
            if self.cap(kind) == 0 {
                return Err(format!("Concurrency cap for '{}' must be at least 1", kind));
            }
        }
        Ok(())
    }
}

/// Limiter for one kind
struct KindLimiter {
    cap: usize,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    last_start: Mutex<Option<Instant>>,
    min_interval: Option<Duration>,
}

impl KindLimiter {
    fn new(cap: usize, min_interval_ms: Option<u64>) -> Self {
        Self {
            cap,
            semaphore: Arc::new(Semaphore::new(cap)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            last_start: Mutex::new(None),
            min_interval: min_interval_ms.filter(|ms| *ms > 0).map(Duration::from_millis),
        }
    }

    /// Time to wait before the next start, reserving the slot in the schedule.
    fn reserve_start(&self) -> Option<Duration> {
        let min_interval = self.min_interval?;
        let mut last = self.last_start.lock();
        let now = Instant::now();
        let start_at = match *last {
            Some(prev) if prev + min_interval > now => prev + min_interval,
            _ => now,
        };
        *last = Some(start_at);
        start_at.checked_duration_since(now).filter(|d| !d.is_zero())
    }
}

/// Held while a job runs; dropping it releases the slot exactly once.
pub struct DispatchPermit {
    kind: JobKind,
    in_flight: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl DispatchPermit {
    pub fn kind(&self) -> JobKind {
        self.kind
    }
}

impl Drop for DispatchPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Per-kind dispatcher. Cheap to share behind an `Arc`; the limiter table is
/// fixed at construction so lookups need no lock.
pub struct Dispatcher {
    limiters: HashMap<JobKind, KindLimiter>,
}

impl Dispatcher {
    pub fn new(config: &DispatchConfig) -> Self {
        let limiters = JobKind::ALL
            .iter()
            .map(|kind| {
                let cap = config.cap(*kind).max(1);
                let interval = config.min_interval_ms.get(kind.as_str()).copied();
                (*kind, KindLimiter::new(cap, interval))
            })
            .collect();
        Self { limiters }
    }

    fn limiter(&self, kind: JobKind) -> &KindLimiter {
        // Every kind is inserted in `new`.
        &self.limiters[&kind]
    }

    /// Wait for a free slot of `kind`.
    pub async fn acquire(&self, kind: JobKind) -> Result<DispatchPermit, ForgeError> {
        let limiter = self.limiter(kind);
        let permit = Arc::clone(&limiter.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| ForgeError::ConfigError(format!("Dispatcher for '{}' is closed", kind)))?;

        if let Some(wait) = limiter.reserve_start() {
            sleep(wait).await;
        }

        let now = limiter.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        limiter.peak.fetch_max(now, Ordering::SeqCst);
        debug!(kind = %kind, in_flight = now, cap = limiter.cap, "Dispatch slot acquired");

        Ok(DispatchPermit {
            kind,
            in_flight: Arc::clone(&limiter.in_flight),
            _permit: permit,
        })
    }

    pub fn cap(&self, kind: JobKind) -> usize {
        self.limiter(kind).cap
    }

    pub fn in_flight(&self, kind: JobKind) -> usize {
        self.limiter(kind).in_flight.load(Ordering::SeqCst)
    }

    /// Highest in-flight count observed for `kind` since construction.
    pub fn peak(&self, kind: JobKind) -> usize {
        self.limiter(kind).peak.load(Ordering::SeqCst)
    }

    pub fn available(&self, kind: JobKind) -> usize {
        self.limiter(kind).semaphore.available_permits()
    }
}
