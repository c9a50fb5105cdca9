//! Data model: the conversion job carried by the queue and its status values.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};

// =============================================================================
// JOB
// =============================================================================

/// A document conversion job.
///
/// The serialized JSON form is the queue entry itself: lists hold no separate
/// id, so removing a job from a list means matching the exact entry text.
/// Every field is required; an entry missing one is rejected at decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionJob {
    pub conversion_id: i64,
    pub file_id: i64,
    pub file_guid: String,
    pub user_id: i64,
    #[serde(rename = "inputS3Path")]
    pub input_s3_path: String,
    #[serde(rename = "outputS3Path")]
    pub output_s3_path: String,
    pub input_extension: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    /// Budget of one processing attempt, in seconds.
    pub timeout: u64,
}

impl ConversionJob {
    /// Parse a raw queue entry.
    pub fn decode(entry: &str) -> Result<Self> {
        serde_json::from_str(entry).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Serialize into a queue entry.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Whether another attempt is allowed after a failure.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Copy of this job with `retry_count` advanced by one.
    ///
    /// Returns `None` once retries are exhausted; `retry_count` never
    /// exceeds `max_retries`.
    pub fn next_attempt(&self) -> Option<Self> {
        if !self.can_retry() {
            return None;
        }
        let mut next = self.clone();
        next.retry_count += 1;
        Some(next)
    }

    /// Deadline budget for a single attempt.
    ///
    /// A zero timeout would expire before the download starts, so it falls
    /// back to the producer default. Anything above
    /// [`defaults::MAX_ATTEMPT_TIMEOUT_SECS`] is capped there.
    pub fn attempt_timeout(&self) -> Duration {
        if self.timeout == 0 {
            Duration::from_secs(defaults::CONVERSION_TIMEOUT_SECS)
        } else {
            Duration::from_secs(self.timeout.min(defaults::MAX_ATTEMPT_TIMEOUT_SECS))
        }
    }

    /// Time elapsed since `created_at`, zero if the timestamp is in the future.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether the job has outlived `threshold` as of `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.age(now) > threshold
    }
}

// =============================================================================
// STATUS
// =============================================================================

/// Status values written to the durable status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    Processing,
    Completed,
    Failed,
}

impl ConversionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionStatus::Processing => "processing",
            ConversionStatus::Completed => "completed",
            ConversionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata recorded alongside a completed conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMetadata {
    pub worker_id: String,
    pub duration_ms: u64,
}

// =============================================================================
// QUEUE NAMES
// =============================================================================

/// The three list names (already prefixed) plus the status mirror key prefix.
///
/// The status mirror key never carries the Redis prefix; observers read it
/// under its bare name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub pending: String,
    pub processing: String,
    pub failed: String,
    pub status_prefix: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self::with_prefix("")
    }
}

impl QueueNames {
    /// Default list names under `prefix`.
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            pending: format!("{prefix}{}", defaults::PENDING_QUEUE),
            processing: format!("{prefix}{}", defaults::PROCESSING_QUEUE),
            failed: format!("{prefix}{}", defaults::FAILED_QUEUE),
            status_prefix: defaults::STATUS_HASH_PREFIX.to_string(),
        }
    }

    /// Key of the status mirror hash for one conversion.
    pub fn status_key(&self, conversion_id: i64) -> String {
        format!("{}{}", self.status_prefix, conversion_id)
    }
}
