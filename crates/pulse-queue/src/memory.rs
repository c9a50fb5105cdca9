//! In-process queue with the same list semantics as the Redis adapter.
//!
//! Used by tests and local development. A single mutex guards every list, so
//! `claim` is one indivisible move just like `BRPOPLPUSH`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use pulse_core::{Error, JobQueue, Result};

/// In-memory implementation of [`JobQueue`].
#[derive(Default)]
pub struct MemoryQueue {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    pushed: Notify,
    unavailable: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store going away: every call fails with a queue error
    /// until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of entries in `list`.
    pub async fn len(&self, list: &str) -> usize {
        self.lists.lock().await.get(list).map_or(0, VecDeque::len)
    }

    /// Fields currently stored on hash `key`.
    pub async fn fields(&self, key: &str) -> HashMap<String, String> {
        self.hashes.lock().await.get(key).cloned().unwrap_or_default()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(Error::Queue("memory queue marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn claim(
        &self,
        source: &str,
        destination: &str,
        wait: Duration,
    ) -> Result<Option<String>> {
        let deadline = Instant::now() + wait;
        loop {
            self.check_available()?;

            // Register interest before looking so a push between the check
            // and the wait is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut lists = self.lists.lock().await;
                if let Some(entry) = lists.get_mut(source).and_then(VecDeque::pop_back) {
                    lists
                        .entry(destination.to_string())
                        .or_default()
                        .push_front(entry.clone());
                    return Ok(Some(entry));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn remove(&self, list: &str, entry: &str) -> Result<bool> {
        self.check_available()?;
        let mut lists = self.lists.lock().await;
        let Some(items) = lists.get_mut(list) else {
            return Ok(false);
        };
        match items.iter().position(|item| item == entry) {
            Some(index) => {
                items.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn push_head(&self, list: &str, entry: &str) -> Result<()> {
        self.check_available()?;
        self.lists
            .lock()
            .await
            .entry(list.to_string())
            .or_default()
            .push_front(entry.to_string());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn range_all(&self, list: &str) -> Result<Vec<String>> {
        self.check_available()?;
        Ok(self
            .lists
            .lock()
            .await
            .get(list)
            .map(|items| items.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_fields(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        self.check_available()?;
        let mut hashes = self.hashes.lock().await;
        let hash = hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.to_string(), value.clone());
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const PENDING: &str = "conversion:pending";
    const PROCESSING: &str = "conversion:processing";

    #[tokio::test]
    async fn test_claim_moves_tail_to_processing_head() {
        let queue = MemoryQueue::new();
        queue.push_head(PENDING, "first").await.unwrap();
        queue.push_head(PENDING, "second").await.unwrap();

        let claimed = queue
            .claim(PENDING, PROCESSING, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(claimed.as_deref(), Some("first"));
        assert_eq!(queue.range_all(PENDING).await.unwrap(), vec!["second"]);
        assert_eq!(queue.range_all(PROCESSING).await.unwrap(), vec!["first"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_times_out_when_empty() {
        let queue = MemoryQueue::new();
        let claimed = queue
            .claim(PENDING, PROCESSING, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(claimed.is_none());
        assert_eq!(queue.len(PROCESSING).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_wakes_on_push() {
        let queue = Arc::new(MemoryQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .claim(PENDING, PROCESSING, Duration::from_secs(30))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        queue.push_head(PENDING, "late").await.unwrap();

        let claimed = waiter.await.unwrap().unwrap();
        assert_eq!(claimed.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_concurrent_claims_single_entry() {
        let queue = Arc::new(MemoryQueue::new());
        queue.push_head(PENDING, "only").await.unwrap();

        let claims = futures::future::join_all((0..2).map(|_| {
            let queue = queue.clone();
            async move {
                queue
                    .claim(PENDING, PROCESSING, Duration::from_millis(50))
                    .await
                    .unwrap()
            }
        }))
        .await;

        let won: Vec<_> = claims.iter().flatten().collect();
        assert_eq!(won.len(), 1);
        assert_eq!(claims.iter().filter(|c| c.is_none()).count(), 1);
        assert_eq!(queue.len(PROCESSING).await, 1);
    }

    #[tokio::test]
    async fn test_remove_by_value_is_idempotent() {
        let queue = MemoryQueue::new();
        queue.push_head(PROCESSING, "job").await.unwrap();
        assert!(queue.remove(PROCESSING, "job").await.unwrap());
        assert!(!queue.remove(PROCESSING, "job").await.unwrap());
        assert!(!queue.remove("missing", "job").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_takes_one_occurrence() {
        let queue = MemoryQueue::new();
        queue.push_head(PROCESSING, "dup").await.unwrap();
        queue.push_head(PROCESSING, "dup").await.unwrap();
        assert!(queue.remove(PROCESSING, "dup").await.unwrap());
        assert_eq!(queue.len(PROCESSING).await, 1);
    }

    #[tokio::test]
    async fn test_set_fields_merges() {
        let queue = MemoryQueue::new();
        queue
            .set_fields("conversion:status:1", &[("status", "failed".to_string())])
            .await
            .unwrap();
        queue
            .set_fields("conversion:status:1", &[("error", "boom".to_string())])
            .await
            .unwrap();
        let fields = queue.fields("conversion:status:1").await;
        assert_eq!(fields.get("status").map(String::as_str), Some("failed"));
        assert_eq!(fields.get("error").map(String::as_str), Some("boom"));
    }

    #[tokio::test]
    async fn test_unavailable_fails_every_call() {
        let queue = MemoryQueue::new();
        queue.set_unavailable(true);
        assert!(matches!(queue.ping().await, Err(Error::Queue(_))));
        assert!(queue
            .claim(PENDING, PROCESSING, Duration::from_millis(1))
            .await
            .is_err());
        queue.set_unavailable(false);
        assert!(queue.ping().await.is_ok());
    }
}
