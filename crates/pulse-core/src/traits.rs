//! Adapter traits the lifecycle engine drives.
//!
//! Each adapter is injected once at startup as an `Arc<dyn Trait>` and shared
//! by every worker loop, so implementations must be safe for concurrent use on
//! their own. The engine never adds locking around them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::models::CompletionMetadata;
use crate::Result;

/// List-based queue with an atomic move-and-claim primitive.
///
/// Entries are opaque strings compared by exact content.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Atomically move one entry from the tail of `source` to the head of
    /// `destination`, waiting up to `wait` for one to appear.
    ///
    /// Returns `Ok(None)` when the wait elapses with nothing to claim.
    async fn claim(&self, source: &str, destination: &str, wait: Duration)
        -> Result<Option<String>>;

    /// Remove one occurrence of `entry` from `list`. Returns whether anything
    /// was removed; absence is not an error.
    async fn remove(&self, list: &str, entry: &str) -> Result<bool>;

    /// Push `entry` onto the head of `list`.
    async fn push_head(&self, list: &str, entry: &str) -> Result<()>;

    /// Snapshot of every entry in `list`, head first.
    async fn range_all(&self, list: &str) -> Result<Vec<String>>;

    /// Set string fields on a hash (used for the status mirror).
    async fn set_fields(&self, key: &str, fields: &[(&str, String)]) -> Result<()>;

    /// Check connectivity.
    async fn ping(&self) -> Result<()>;
}

/// External document conversion service.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Convert the local file at `input` and return the path of the result.
    ///
    /// Performs no retries; any non-success response is an error.
    async fn convert(&self, input: &Path, source_type: &str) -> Result<PathBuf>;

    /// Check if the conversion service answers.
    async fn health_check(&self) -> Result<bool>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Byte transfer between local scratch space and the object store.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Download `remote_path` into scratch space. `local_name` is a file name
    /// hint (no directories).
    async fn download(&self, remote_path: &str, local_name: &str) -> Result<PathBuf>;

    /// Upload the local file to `remote_path`.
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()>;

    /// Delete a local scratch file. No-op if it does not exist.
    async fn cleanup(&self, local_path: &Path) -> Result<()>;
}

/// Durable, observational mirror of a job's lifecycle.
///
/// The engine treats every call as fire-and-forget: failures are logged and
/// never abort job processing.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn set_processing(&self, conversion_id: i64) -> Result<()>;

    async fn set_completed(
        &self,
        conversion_id: i64,
        output_path: &str,
        metadata: &CompletionMetadata,
    ) -> Result<()>;

    async fn set_failed(&self, conversion_id: i64) -> Result<()>;

    async fn set_error(&self, conversion_id: i64, message: &str) -> Result<()>;

    async fn increment_retry_count(&self, conversion_id: i64) -> Result<()>;

    /// Check connectivity.
    async fn ping(&self) -> Result<()>;
}
