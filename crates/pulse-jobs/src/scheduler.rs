//! Deferred re-enqueue of failed jobs.
//!
//! A retry is a tracked task that sleeps for its backoff delay and then pushes
//! the updated entry onto the head of the pending list. Workers never wait on
//! it. On shutdown the scheduler is flushed: every retry still sleeping is
//! pushed immediately rather than dropped with the process.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use pulse_core::defaults::{RETRY_BACKOFF_BASE, RETRY_BACKOFF_CAP_SECS};
use pulse_core::JobQueue;

/// Push attempts per retry before the entry is given up on.
const PUSH_ATTEMPTS: u32 = 3;

/// Pause between push attempts.
const PUSH_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Backoff before retry number `retry_count` becomes visible: `min(2^k, 30)`
/// seconds.
pub fn backoff_delay(retry_count: u32) -> Duration {
    let secs = RETRY_BACKOFF_BASE
        .checked_pow(retry_count)
        .unwrap_or(u64::MAX)
        .min(RETRY_BACKOFF_CAP_SECS);
    Duration::from_secs(secs)
}

/// Outcome of [`RetryScheduler::flush`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Retries that were waiting when the flush began and reached pending.
    pub flushed: usize,
    /// Retries still unresolved when the flush budget ran out.
    pub abandoned: usize,
}

/// Tracked, cancellable delayed pushes onto the pending list.
#[derive(Clone)]
pub struct RetryScheduler {
    queue: Arc<dyn JobQueue>,
    pending: Arc<str>,
    tracker: TaskTracker,
    flush: CancellationToken,
    outstanding: Arc<AtomicUsize>,
}

impl RetryScheduler {
    pub fn new(queue: Arc<dyn JobQueue>, pending: impl Into<Arc<str>>) -> Self {
        Self {
            queue,
            pending: pending.into(),
            tracker: TaskTracker::new(),
            flush: CancellationToken::new(),
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of retries scheduled but not yet pushed.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Push `entry` onto pending after `delay`.
    ///
    /// After a flush has started, new retries are pushed without delay.
    pub fn schedule(&self, conversion_id: i64, entry: String, delay: Duration) {
        let queue = self.queue.clone();
        let pending = self.pending.clone();
        let flush = self.flush.clone();
        let outstanding = self.outstanding.clone();

        outstanding.fetch_add(1, Ordering::SeqCst);
        self.tracker.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = flush.cancelled() => {
                    debug!(conversion_id, "Flushing scheduled retry early");
                }
            }

            let mut attempt = 1;
            loop {
                match queue.push_head(&pending, &entry).await {
                    Ok(()) => {
                        debug!(conversion_id, "Retry pushed to pending");
                        break;
                    }
                    Err(e) if attempt < PUSH_ATTEMPTS => {
                        warn!(
                            conversion_id,
                            attempt,
                            error = %e,
                            "Retry push failed, trying again"
                        );
                        attempt += 1;
                        tokio::time::sleep(PUSH_RETRY_PAUSE).await;
                    }
                    Err(e) => {
                        error!(
                            conversion_id,
                            error = %e,
                            entry = %entry,
                            "Retry push failed, job is no longer queued"
                        );
                        break;
                    }
                }
            }
            outstanding.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Push every waiting retry now and wait up to `budget` for them to land.
    pub async fn flush(&self, budget: Duration) -> FlushReport {
        let waiting = self.outstanding();
        self.tracker.close();
        self.flush.cancel();

        if tokio::time::timeout(budget, self.tracker.wait()).await.is_ok() {
            if waiting > 0 {
                info!(flushed = waiting, "Scheduled retries flushed to pending");
            }
            return FlushReport {
                flushed: waiting,
                abandoned: 0,
            };
        }

        let abandoned = self.outstanding();
        warn!(
            abandoned,
            budget_ms = budget.as_millis() as u64,
            "Retry flush exceeded its budget, abandoning outstanding retries"
        );
        FlushReport {
            flushed: waiting.saturating_sub(abandoned),
            abandoned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_queue::MemoryQueue;

    const PENDING: &str = "conversion:pending";

    #[test]
    fn test_backoff_sequence() {
        let secs: Vec<u64> = (1..=7).map(|k| backoff_delay(k).as_secs()).collect();
        assert_eq!(secs, vec![2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn test_backoff_large_exponent_saturates() {
        assert_eq!(backoff_delay(64), Duration::from_secs(30));
        assert_eq!(backoff_delay(u32::MAX), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_pushes_after_delay() {
        let queue = Arc::new(MemoryQueue::new());
        let scheduler = RetryScheduler::new(queue.clone(), PENDING);

        scheduler.schedule(42, "entry".to_string(), Duration::from_secs(4));
        assert_eq!(scheduler.outstanding(), 1);

        tokio::time::sleep(Duration::from_millis(3_900)).await;
        assert_eq!(queue.len(PENDING).await, 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(queue.len(PENDING).await, 1);
        assert_eq!(scheduler.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_pushes_waiting_retries_immediately() {
        let queue = Arc::new(MemoryQueue::new());
        let scheduler = RetryScheduler::new(queue.clone(), PENDING);

        scheduler.schedule(1, "a".to_string(), Duration::from_secs(30));
        scheduler.schedule(2, "b".to_string(), Duration::from_secs(16));

        let report = scheduler.flush(Duration::from_secs(5)).await;
        assert_eq!(
            report,
            FlushReport {
                flushed: 2,
                abandoned: 0
            }
        );
        assert_eq!(queue.len(PENDING).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_after_flush_is_immediate() {
        let queue = Arc::new(MemoryQueue::new());
        let scheduler = RetryScheduler::new(queue.clone(), PENDING);
        scheduler.flush(Duration::from_secs(1)).await;

        scheduler.schedule(7, "late".to_string(), Duration::from_secs(30));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.len(PENDING).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_abandons_when_queue_unreachable() {
        let queue = Arc::new(MemoryQueue::new());
        queue.set_unavailable(true);
        let scheduler = RetryScheduler::new(queue.clone(), PENDING);

        scheduler.schedule(9, "stuck".to_string(), Duration::from_secs(8));
        let report = scheduler.flush(Duration::from_millis(500)).await;
        assert_eq!(report.abandoned, 1);
        assert_eq!(report.flushed, 0);
    }
}
