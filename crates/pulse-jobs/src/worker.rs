//! Worker pool supervisor: N engine loops plus the recovery sweep.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use pulse_core::defaults::{
    CLAIM_WAIT_SECS, RECOVERY_INTERVAL_SECS, SHUTDOWN_GRACE_SECS, STALE_THRESHOLD_SECS,
    STATUS_WRITE_TIMEOUT_SECS, TRANSIENT_BACKOFF_SECS, WORKER_COUNT,
};
use pulse_core::{Config, QueueNames};

use crate::engine::{LifecycleEngine, Services, Settlement, Tick};
use crate::recovery::{RecoverySweep, SweepReport};

/// Floor for the retry flush when the grace period is already spent.
const MIN_FLUSH_BUDGET: Duration = Duration::from_secs(1);

/// Floor for claim waits, backoffs and the sweep period set through the
/// builders.
pub(crate) const MIN_PERIOD: Duration = Duration::from_millis(10);

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent engine loops.
    pub worker_count: usize,
    /// Bounded wait of each claim.
    pub claim_wait: Duration,
    /// Pause after a transient queue error.
    pub transient_backoff: Duration,
    pub recovery_interval: Duration,
    pub stale_threshold: Duration,
    /// How long in-flight attempts may run after shutdown starts.
    pub shutdown_grace: Duration,
    pub status_write_timeout: Duration,
    pub queues: QueueNames,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: WORKER_COUNT,
            claim_wait: Duration::from_secs(CLAIM_WAIT_SECS),
            transient_backoff: Duration::from_secs(TRANSIENT_BACKOFF_SECS),
            recovery_interval: Duration::from_secs(RECOVERY_INTERVAL_SECS),
            stale_threshold: Duration::from_secs(STALE_THRESHOLD_SECS),
            shutdown_grace: Duration::from_secs(SHUTDOWN_GRACE_SECS),
            status_write_timeout: Duration::from_secs(STATUS_WRITE_TIMEOUT_SECS),
            queues: QueueNames::default(),
        }
    }
}

impl WorkerConfig {
    /// Take the pool settings from the loaded service configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::default()
            .with_worker_count(config.worker_count)
            .with_claim_wait(config.claim_wait)
            .with_recovery_interval(config.recovery_interval)
            .with_stale_threshold(config.stale_threshold)
            .with_shutdown_grace(config.shutdown_grace)
            .with_queues(config.queues.clone())
    }

    /// Set the number of engine loops (at least one).
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    pub fn with_claim_wait(mut self, wait: Duration) -> Self {
        self.claim_wait = wait.max(MIN_PERIOD);
        self
    }

    pub fn with_transient_backoff(mut self, backoff: Duration) -> Self {
        self.transient_backoff = backoff.max(MIN_PERIOD);
        self
    }

    pub fn with_recovery_interval(mut self, interval: Duration) -> Self {
        self.recovery_interval = interval.max(MIN_PERIOD);
        self
    }

    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold.max(MIN_PERIOD);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_queues(mut self, queues: QueueNames) -> Self {
        self.queues = queues;
        self
    }
}

/// Event emitted by the engine, the sweep and the supervisor.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A worker loop began claiming.
    WorkerStarted { worker_id: String },
    /// A worker loop exited.
    WorkerStopped { worker_id: String },
    JobStarted {
        conversion_id: i64,
        worker_id: String,
    },
    JobCompleted {
        conversion_id: i64,
        worker_id: String,
        duration_ms: u64,
    },
    RetryScheduled {
        conversion_id: i64,
        retry_count: u32,
        delay: Duration,
    },
    /// Retries exhausted; the entry is on the failed list.
    JobFailed { conversion_id: i64, error: String },
    /// An undecodable entry was discarded.
    EntryDropped { reason: String },
    /// The sweep pulled a stale entry out of processing.
    StaleRecovered { conversion_id: i64 },
    SweepCompleted(SweepReport),
}

/// What happened during [`WorkerHandle::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Loops still running at the end of the grace period.
    pub aborted: usize,
    /// Scheduled retries pushed to pending early.
    pub flushed_retries: usize,
    /// Scheduled retries lost because the flush ran out of time.
    pub abandoned_retries: usize,
}

/// Handle for controlling a running pool.
pub struct WorkerHandle {
    shutdown: CancellationToken,
    tasks: JoinSet<()>,
    engine: LifecycleEngine,
    grace: Duration,
}

impl WorkerHandle {
    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.engine.subscribe()
    }

    pub fn engine(&self) -> &LifecycleEngine {
        &self.engine
    }

    /// Token that stops the pool when cancelled. Cancelling it directly only
    /// stops claiming; call [`shutdown`](Self::shutdown) to also drain.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop claiming, let in-flight attempts finish within the grace period,
    /// abort whatever is left, then flush scheduled retries.
    pub async fn shutdown(mut self) -> ShutdownReport {
        info!(
            grace_secs = self.grace.as_secs(),
            in_flight = self.engine.in_flight().len(),
            "Worker pool shutting down"
        );
        self.shutdown.cancel();

        let deadline = Instant::now() + self.grace;
        let mut report = ShutdownReport::default();

        loop {
            match tokio::time::timeout_at(deadline, self.tasks.join_next()).await {
                Ok(Some(Ok(()))) => {}
                Ok(Some(Err(e))) => {
                    if e.is_panic() {
                        error!(error = ?e, "Worker task panicked");
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    report.aborted = self.tasks.len();
                    warn!(
                        aborted = report.aborted,
                        "Grace period elapsed, aborting remaining workers"
                    );
                    self.tasks.abort_all();
                    while self.tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }

        let budget = deadline
            .saturating_duration_since(Instant::now())
            .max(MIN_FLUSH_BUDGET);
        let flush = self.engine.scheduler().flush(budget).await;
        report.flushed_retries = flush.flushed;
        report.abandoned_retries = flush.abandoned;

        info!(
            aborted = report.aborted,
            flushed_retries = report.flushed_retries,
            abandoned_retries = report.abandoned_retries,
            "Worker pool stopped"
        );
        report
    }
}

/// The assembled pool, ready to start.
pub struct WorkerPool {
    engine: LifecycleEngine,
    sweep: RecoverySweep,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn engine(&self) -> &LifecycleEngine {
        &self.engine
    }

    pub fn sweep(&self) -> &RecoverySweep {
        &self.sweep
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Spawn the engine loops and the sweep and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let shutdown = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for n in 0..self.config.worker_count {
            let worker_id = format!("worker-{n}");
            tasks.spawn(run_worker(
                self.engine.clone(),
                worker_id,
                self.config.clone(),
                shutdown.clone(),
            ));
        }
        tasks.spawn(
            self.sweep
                .clone()
                .run(self.config.recovery_interval, shutdown.clone()),
        );

        info!(
            workers = self.config.worker_count,
            pending = %self.config.queues.pending,
            processing = %self.config.queues.processing,
            "Worker pool started"
        );

        WorkerHandle {
            shutdown,
            tasks,
            engine: self.engine,
            grace: self.config.shutdown_grace,
        }
    }
}

/// One engine loop. Exits only when `shutdown` fires.
#[instrument(skip(engine, config, shutdown))]
async fn run_worker(
    engine: LifecycleEngine,
    worker_id: String,
    config: WorkerConfig,
    shutdown: CancellationToken,
) {
    info!("Worker started");
    engine.emit(WorkerEvent::WorkerStarted {
        worker_id: worker_id.clone(),
    });

    loop {
        // A claim that is waiting for work is abandoned on shutdown; an
        // attempt that is already running is not.
        let claimed = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            claimed = engine.claim(config.claim_wait) => claimed,
        };

        match claimed {
            Ok(Some(entry)) => match engine.handle_entry(&worker_id, &entry).await {
                Tick::Settled(Settlement::Retried { retry_count, delay }) => {
                    debug!(
                        retry_count,
                        delay_secs = delay.as_secs(),
                        "Attempt settled as retry"
                    );
                }
                tick => debug!(?tick, "Entry handled"),
            },
            Ok(None) => {}
            Err(e) => {
                error!(
                    error = %e,
                    backoff_secs = config.transient_backoff.as_secs(),
                    "Failed to claim job"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(config.transient_backoff) => {}
                }
            }
        }
    }

    info!("Worker stopped");
    engine.emit(WorkerEvent::WorkerStopped { worker_id });
}

/// Builder for creating a worker pool.
pub struct WorkerBuilder {
    services: Services,
    config: WorkerConfig,
}

impl WorkerBuilder {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            config: WorkerConfig::default(),
        }
    }

    /// Set the worker configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> WorkerPool {
        let engine = LifecycleEngine::new(self.services, self.config.queues.clone())
            .with_status_timeout(self.config.status_write_timeout);
        let sweep = RecoverySweep::new(engine.clone(), self.config.stale_threshold);
        WorkerPool {
            engine,
            sweep,
            config: self.config,
        }
    }
}
