//! Periodic recovery of entries stranded in the processing list.
//!
//! A worker that crashes or is force-aborted mid-attempt leaves its entry in
//! processing. The sweep snapshots the list, then moves every entry older
//! than the staleness threshold through the same retry-or-fail branching as a
//! failed attempt.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use pulse_core::{ConversionJob, Result};

use crate::engine::{LifecycleEngine, Settlement};
use crate::worker::{WorkerEvent, MIN_PERIOD};

/// Counts from one pass over the processing list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    /// Stale entries re-enqueued for another attempt.
    pub recovered: usize,
    /// Stale entries that had no retries left.
    pub failed: usize,
    /// Undecodable entries discarded.
    pub dropped: usize,
    /// In-flight here, or already gone by the time the sweep acted.
    pub skipped: usize,
}

#[derive(Clone)]
pub struct RecoverySweep {
    engine: LifecycleEngine,
    stale_threshold: Duration,
}

impl RecoverySweep {
    pub fn new(engine: LifecycleEngine, stale_threshold: Duration) -> Self {
        Self {
            engine,
            stale_threshold,
        }
    }

    pub fn stale_threshold(&self) -> Duration {
        self.stale_threshold
    }

    fn stale_reason(&self) -> String {
        format!(
            "stale: exceeded staleness threshold of {}s",
            self.stale_threshold.as_secs()
        )
    }

    /// One pass over the processing list as of `now`.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "recovery"))]
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let queue = &self.engine.services().queue;
        let processing = &self.engine.queues().processing;
        let entries = queue.range_all(processing).await?;

        let mut report = SweepReport {
            scanned: entries.len(),
            ..SweepReport::default()
        };

        for entry in entries {
            if self.engine.in_flight().contains(&entry) {
                report.skipped += 1;
                continue;
            }

            let job = match ConversionJob::decode(&entry) {
                Ok(job) => job,
                Err(e) => {
                    if self.engine.drop_poison(&entry, &e.to_string(), None).await {
                        report.dropped += 1;
                    } else {
                        report.skipped += 1;
                    }
                    continue;
                }
            };

            if !job.is_stale(now, self.stale_threshold) {
                continue;
            }

            // The snapshot may be out of date: only the sweep that actually
            // removes the entry may settle it.
            match queue.remove(processing, &entry).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(
                        conversion_id = job.conversion_id,
                        "Stale entry already left processing"
                    );
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!(
                        conversion_id = job.conversion_id,
                        error = %e,
                        "Failed to remove stale entry"
                    );
                    report.skipped += 1;
                    continue;
                }
            }

            warn!(
                conversion_id = job.conversion_id,
                retry_count = job.retry_count,
                age_secs = job.age(now).as_secs(),
                "Recovering stale job"
            );
            self.engine.emit(WorkerEvent::StaleRecovered {
                conversion_id: job.conversion_id,
            });

            match self
                .engine
                .settle_failure(&entry, &job, &self.stale_reason())
                .await
            {
                Settlement::Retried { .. } => report.recovered += 1,
                Settlement::Failed => report.failed += 1,
                Settlement::Completed => {}
            }
        }

        Ok(report)
    }

    /// Sweep every `interval` until `shutdown` fires. The first pass runs one
    /// interval after start.
    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        let interval = interval.max(MIN_PERIOD);
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            interval_secs = interval.as_secs(),
            stale_threshold_secs = self.stale_threshold.as_secs(),
            "Recovery sweep started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.sweep_once(Utc::now()).await {
                Ok(report) => {
                    if report.recovered + report.failed + report.dropped > 0 {
                        info!(
                            scanned = report.scanned,
                            recovered = report.recovered,
                            failed = report.failed,
                            dropped = report.dropped,
                            skipped = report.skipped,
                            "Recovery sweep finished"
                        );
                    } else {
                        debug!(
                            scanned = report.scanned,
                            skipped = report.skipped,
                            "Recovery sweep found nothing stale"
                        );
                    }
                    self.engine.emit(WorkerEvent::SweepCompleted(report));
                }
                Err(e) => error!(error = %e, "Recovery sweep failed"),
            }
        }

        info!("Recovery sweep stopped");
    }
}
