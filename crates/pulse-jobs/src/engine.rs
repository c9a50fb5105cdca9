//! Job lifecycle engine: claim, process, settle.
//!
//! The queue holds the canonical state of every job. A claimed entry sits in
//! the processing list until the engine settles it: removed on success, moved
//! to the failed list on exhaustion, or removed and re-enqueued through the
//! [`RetryScheduler`] after a failed attempt. Status store writes run beside
//! that state machine and never decide it.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use pulse_core::defaults::{EVENT_BUS_CAPACITY, STATUS_WRITE_TIMEOUT_SECS};
use pulse_core::{
    CompletionMetadata, ConversionJob, ConversionStatus, DocumentConverter, FileStorage, JobQueue,
    QueueNames, Result, StatusStore,
};

use crate::scheduler::{backoff_delay, RetryScheduler};
use crate::worker::WorkerEvent;

/// Longest slice of a poison entry that is echoed into logs.
const ENTRY_PREVIEW_CHARS: usize = 200;

// =============================================================================
// SERVICES
// =============================================================================

/// The adapters every engine loop shares. Injected once at startup.
#[derive(Clone)]
pub struct Services {
    pub queue: Arc<dyn JobQueue>,
    pub converter: Arc<dyn DocumentConverter>,
    pub storage: Arc<dyn FileStorage>,
    pub status: Arc<dyn StatusStore>,
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// Processing step of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Download,
    Conversion,
    Upload,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Download => "download",
            Step::Conversion => "conversion",
            Step::Upload => "upload",
        })
    }
}

/// Why an attempt failed. The display text is what lands in `error_message`.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error("{step} failed: {source}")]
    Step {
        step: Step,
        source: pulse_core::Error,
    },
    #[error("{step} failed: attempt deadline of {budget_secs}s exceeded")]
    Deadline { step: Step, budget_secs: u64 },
}

impl AttemptError {
    pub fn step(&self) -> Step {
        match self {
            AttemptError::Step { step, .. } | AttemptError::Deadline { step, .. } => *step,
        }
    }
}

/// How a job left the processing list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Completed,
    /// Re-enqueue scheduled with the new retry count.
    Retried { retry_count: u32, delay: Duration },
    /// Moved to the failed list.
    Failed,
}

/// Result of one claim-and-handle cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Nothing to claim within the wait.
    Idle,
    /// Undecodable entry removed and discarded.
    Dropped,
    Settled(Settlement),
}

// =============================================================================
// IN-FLIGHT REGISTRY
// =============================================================================

/// Entries this process is actively working, so the recovery sweep leaves
/// them alone. Counts per entry text since identical entries may coexist.
#[derive(Clone, Default)]
pub struct InFlight {
    entries: Arc<Mutex<HashMap<String, usize>>>,
}

impl InFlight {
    pub fn contains(&self, entry: &str) -> bool {
        self.lock().contains_key(entry)
    }

    pub fn len(&self) -> usize {
        self.lock().values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub(crate) fn enter(&self, entry: &str) -> InFlightGuard {
        *self.lock().entry(entry.to_string()).or_insert(0) += 1;
        InFlightGuard {
            registry: self.clone(),
            entry: entry.to_string(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) struct InFlightGuard {
    registry: InFlight,
    entry: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut entries = self.registry.lock();
        if let Some(count) = entries.get_mut(&self.entry) {
            *count -= 1;
            if *count == 0 {
                entries.remove(&self.entry);
            }
        }
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Drives claimed entries to a settlement. Cheap to clone; every worker loop
/// and the recovery sweep share one instance.
#[derive(Clone)]
pub struct LifecycleEngine {
    services: Services,
    queues: QueueNames,
    scheduler: RetryScheduler,
    in_flight: InFlight,
    event_tx: broadcast::Sender<WorkerEvent>,
    status_timeout: Duration,
}

impl LifecycleEngine {
    pub fn new(services: Services, queues: QueueNames) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let scheduler = RetryScheduler::new(services.queue.clone(), queues.pending.as_str());
        Self {
            services,
            queues,
            scheduler,
            in_flight: InFlight::default(),
            event_tx,
            status_timeout: Duration::from_secs(STATUS_WRITE_TIMEOUT_SECS),
        }
    }

    /// Bound for each status store and status mirror write.
    pub fn with_status_timeout(mut self, timeout: Duration) -> Self {
        self.status_timeout = timeout;
        self
    }

    pub fn queues(&self) -> &QueueNames {
        &self.queues
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn scheduler(&self) -> &RetryScheduler {
        &self.scheduler
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Get a receiver for engine and worker events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: WorkerEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Atomically move one entry from pending to processing, waiting up to
    /// `wait`.
    pub async fn claim(&self, wait: Duration) -> Result<Option<String>> {
        self.services
            .queue
            .claim(&self.queues.pending, &self.queues.processing, wait)
            .await
    }

    /// Claim one entry and drive it to a settlement.
    pub async fn run_once(&self, worker_id: &str, wait: Duration) -> Result<Tick> {
        match self.claim(wait).await? {
            Some(entry) => Ok(self.handle_entry(worker_id, &entry).await),
            None => Ok(Tick::Idle),
        }
    }

    /// Handle an entry that is already in the processing list.
    pub async fn handle_entry(&self, worker_id: &str, entry: &str) -> Tick {
        match ConversionJob::decode(entry) {
            Ok(job) => Tick::Settled(self.process(worker_id, entry, &job).await),
            Err(e) => {
                self.drop_poison(entry, &e.to_string(), Some(worker_id)).await;
                Tick::Dropped
            }
        }
    }

    /// Remove an undecodable entry from processing for good.
    pub(crate) async fn drop_poison(
        &self,
        entry: &str,
        reason: &str,
        worker_id: Option<&str>,
    ) -> bool {
        let removed = match self
            .services
            .queue
            .remove(&self.queues.processing, entry)
            .await
        {
            Ok(removed) => removed,
            Err(e) => {
                error!(error = %e, "Failed to remove undecodable entry from processing");
                false
            }
        };

        let preview: String = entry.chars().take(ENTRY_PREVIEW_CHARS).collect();
        warn!(
            worker_id,
            error = reason,
            entry = %preview,
            removed,
            "Dropping undecodable queue entry"
        );
        self.emit(WorkerEvent::EntryDropped {
            reason: reason.to_string(),
        });
        removed
    }

    #[instrument(
        skip(self, entry, job),
        fields(conversion_id = job.conversion_id, retry_count = job.retry_count)
    )]
    async fn process(&self, worker_id: &str, entry: &str, job: &ConversionJob) -> Settlement {
        let _guard = self.in_flight.enter(entry);
        let start = Instant::now();
        let conversion_id = job.conversion_id;

        info!(worker_id, file_guid = %job.file_guid, "Processing conversion");
        self.emit(WorkerEvent::JobStarted {
            conversion_id,
            worker_id: worker_id.to_string(),
        });

        self.record(
            "set_processing",
            conversion_id,
            self.services.status.set_processing(conversion_id),
        )
        .await;

        // The budget covers the attempt only, not the status write above.
        let budget = job.attempt_timeout();
        let deadline = Instant::now() + budget;

        match self.attempt(job, deadline, budget).await {
            Ok(()) => {
                self.complete(worker_id, entry, job, start.elapsed()).await;
                Settlement::Completed
            }
            Err(e) => {
                warn!(worker_id, step = %e.step(), error = %e, "Conversion attempt failed");
                self.fail_attempt(entry, job, &e.to_string()).await
            }
        }
    }

    /// Download, convert and upload under one deadline. Local files are
    /// removed whatever the outcome.
    async fn attempt(
        &self,
        job: &ConversionJob,
        deadline: Instant,
        budget: Duration,
    ) -> std::result::Result<(), AttemptError> {
        let local_name = format!("{}.{}", job.file_guid, job.input_extension);
        let input = bounded(
            Step::Download,
            deadline,
            budget,
            self.services
                .storage
                .download(&job.input_s3_path, &local_name),
        )
        .await?;

        let result = self.convert_and_upload(job, &input, deadline, budget).await;
        self.cleanup(&input).await;
        result
    }

    async fn convert_and_upload(
        &self,
        job: &ConversionJob,
        input: &Path,
        deadline: Instant,
        budget: Duration,
    ) -> std::result::Result<(), AttemptError> {
        let output = bounded(
            Step::Conversion,
            deadline,
            budget,
            self.services.converter.convert(input, &job.input_extension),
        )
        .await?;

        let result = bounded(
            Step::Upload,
            deadline,
            budget,
            self.services.storage.upload(&output, &job.output_s3_path),
        )
        .await;
        self.cleanup(&output).await;
        result
    }

    async fn cleanup(&self, path: &Path) {
        if let Err(e) = self.services.storage.cleanup(path).await {
            warn!(path = %path.display(), error = %e, "Scratch cleanup failed");
        }
    }

    async fn complete(
        &self,
        worker_id: &str,
        entry: &str,
        job: &ConversionJob,
        elapsed: Duration,
    ) {
        let conversion_id = job.conversion_id;
        let duration_ms = elapsed.as_millis() as u64;
        let metadata = CompletionMetadata {
            worker_id: worker_id.to_string(),
            duration_ms,
        };

        self.record(
            "set_completed",
            conversion_id,
            self.services
                .status
                .set_completed(conversion_id, &job.output_s3_path, &metadata),
        )
        .await;
        self.mirror(conversion_id, ConversionStatus::Completed, None)
            .await;

        match self
            .services
            .queue
            .remove(&self.queues.processing, entry)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(conversion_id, "Completed entry was no longer in processing"),
            Err(e) => error!(
                conversion_id,
                error = %e,
                "Failed to remove completed entry from processing"
            ),
        }

        info!(worker_id, conversion_id, duration_ms, "Conversion completed");
        self.emit(WorkerEvent::JobCompleted {
            conversion_id,
            worker_id: worker_id.to_string(),
            duration_ms,
        });
    }

    /// Take a failed attempt out of processing, then retry or fail it.
    pub async fn fail_attempt(&self, entry: &str, job: &ConversionJob, reason: &str) -> Settlement {
        if let Err(e) = self
            .services
            .queue
            .remove(&self.queues.processing, entry)
            .await
        {
            error!(
                conversion_id = job.conversion_id,
                error = %e,
                "Failed to remove failed entry from processing"
            );
        }
        self.settle_failure(entry, job, reason).await
    }

    /// Retry-or-fail branching for an entry already removed from processing.
    pub(crate) async fn settle_failure(
        &self,
        entry: &str,
        job: &ConversionJob,
        reason: &str,
    ) -> Settlement {
        let conversion_id = job.conversion_id;

        self.record(
            "increment_retry_count",
            conversion_id,
            self.services.status.increment_retry_count(conversion_id),
        )
        .await;

        let retry = job.next_attempt().and_then(|next| match next.encode() {
            Ok(encoded) => Some((next.retry_count, encoded)),
            Err(e) => {
                error!(conversion_id, error = %e, "Failed to encode retry entry");
                None
            }
        });

        match retry {
            Some((retry_count, encoded)) => {
                let delay = backoff_delay(retry_count);
                self.scheduler.schedule(conversion_id, encoded, delay);
                warn!(
                    conversion_id,
                    retry_count,
                    max_retries = job.max_retries,
                    delay_secs = delay.as_secs(),
                    error = reason,
                    "Retry scheduled"
                );
                self.emit(WorkerEvent::RetryScheduled {
                    conversion_id,
                    retry_count,
                    delay,
                });
                Settlement::Retried { retry_count, delay }
            }
            None => {
                self.exhaust(entry, job, reason).await;
                Settlement::Failed
            }
        }
    }

    async fn exhaust(&self, entry: &str, job: &ConversionJob, reason: &str) {
        let conversion_id = job.conversion_id;

        if let Err(e) = self
            .services
            .queue
            .push_head(&self.queues.failed, entry)
            .await
        {
            error!(
                conversion_id,
                error = %e,
                entry,
                "Failed to push exhausted entry to the failed list"
            );
        }

        self.record(
            "set_failed",
            conversion_id,
            self.services.status.set_failed(conversion_id),
        )
        .await;
        self.record(
            "set_error",
            conversion_id,
            self.services.status.set_error(conversion_id, reason),
        )
        .await;
        self.mirror(conversion_id, ConversionStatus::Failed, Some(reason))
            .await;

        error!(
            conversion_id,
            max_retries = job.max_retries,
            error = reason,
            "Conversion failed permanently"
        );
        self.emit(WorkerEvent::JobFailed {
            conversion_id,
            error: reason.to_string(),
        });
    }

    async fn mirror(&self, conversion_id: i64, status: ConversionStatus, error: Option<&str>) {
        let mut fields = vec![
            ("status", status.as_str().to_string()),
            ("updated_at", Utc::now().to_rfc3339()),
        ];
        if let Some(error) = error {
            fields.push(("error", error.to_string()));
        }

        let key = self.queues.status_key(conversion_id);
        self.record(
            "status_mirror",
            conversion_id,
            self.services.queue.set_fields(&key, &fields),
        )
        .await;
    }

    /// Best-effort status write, bounded and never propagated.
    async fn record<F>(&self, op: &'static str, conversion_id: i64, write: F)
    where
        F: Future<Output = Result<()>>,
    {
        match tokio::time::timeout(self.status_timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(op, conversion_id, error = %e, "Status write failed"),
            Err(_) => warn!(
                op,
                conversion_id,
                timeout_secs = self.status_timeout.as_secs(),
                "Status write timed out"
            ),
        }
    }
}

/// Run one step under the attempt deadline.
async fn bounded<T, F>(
    step: Step,
    deadline: Instant,
    budget: Duration,
    fut: F,
) -> std::result::Result<T, AttemptError>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(AttemptError::Step { step, source }),
        Err(_) => Err(AttemptError::Deadline {
            step,
            budget_secs: budget.as_secs(),
        }),
    }
}
