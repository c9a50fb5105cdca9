//! Test doubles for the engine's adapters.
//!
//! Compiled into the library so integration tests (and downstream crates)
//! can drive the engine without Gotenberg or PostgreSQL.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use pulse_core::defaults::{CONVERSION_MAX_RETRIES, CONVERSION_TIMEOUT_SECS, CONVERTED_SUFFIX};
use pulse_core::{
    CompletionMetadata, ConversionJob, DocumentConverter, Error, Result, StatusStore,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A job for `conversion_id` with producer defaults, created now.
///
/// Input is `uploads/abc-123.docx`, output `converted/abc-123.pdf`.
pub fn sample_job(conversion_id: i64) -> ConversionJob {
    ConversionJob {
        conversion_id,
        file_id: 7,
        file_guid: "abc-123".to_string(),
        user_id: 9,
        input_s3_path: "uploads/abc-123.docx".to_string(),
        output_s3_path: "converted/abc-123.pdf".to_string(),
        input_extension: "docx".to_string(),
        retry_count: 0,
        max_retries: CONVERSION_MAX_RETRIES,
        created_at: Utc::now(),
        timeout: CONVERSION_TIMEOUT_SECS,
    }
}

// =============================================================================
// STATUS STORE
// =============================================================================

/// One write received by [`RecordingStatusStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusCall {
    Processing,
    Completed {
        output_path: String,
        worker_id: String,
        duration_ms: u64,
    },
    Failed,
    Error(String),
    RetryIncremented,
}

/// Records every status write in order. Can be switched into a failing mode
/// to simulate a database outage, or slowed down on `set_processing`.
#[derive(Default)]
pub struct RecordingStatusStore {
    calls: Mutex<Vec<(i64, StatusCall)>>,
    failing: AtomicBool,
    processing_delay: Mutex<Option<Duration>>,
}

impl RecordingStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make every `set_processing` write take `delay` before it lands.
    pub fn set_processing_delay(&self, delay: Duration) {
        *lock(&self.processing_delay) = Some(delay);
    }

    pub fn calls(&self) -> Vec<(i64, StatusCall)> {
        lock(&self.calls).clone()
    }

    pub fn calls_for(&self, conversion_id: i64) -> Vec<StatusCall> {
        lock(&self.calls)
            .iter()
            .filter(|(id, _)| *id == conversion_id)
            .map(|(_, call)| call.clone())
            .collect()
    }

    fn push(&self, conversion_id: i64, call: StatusCall) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Internal("status store unavailable".to_string()));
        }
        lock(&self.calls).push((conversion_id, call));
        Ok(())
    }
}

#[async_trait]
impl StatusStore for RecordingStatusStore {
    async fn set_processing(&self, conversion_id: i64) -> Result<()> {
        let delay = *lock(&self.processing_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.push(conversion_id, StatusCall::Processing)
    }

    async fn set_completed(
        &self,
        conversion_id: i64,
        output_path: &str,
        metadata: &CompletionMetadata,
    ) -> Result<()> {
        self.push(
            conversion_id,
            StatusCall::Completed {
                output_path: output_path.to_string(),
                worker_id: metadata.worker_id.clone(),
                duration_ms: metadata.duration_ms,
            },
        )
    }

    async fn set_failed(&self, conversion_id: i64) -> Result<()> {
        self.push(conversion_id, StatusCall::Failed)
    }

    async fn set_error(&self, conversion_id: i64, message: &str) -> Result<()> {
        self.push(conversion_id, StatusCall::Error(message.to_string()))
    }

    async fn increment_retry_count(&self, conversion_id: i64) -> Result<()> {
        self.push(conversion_id, StatusCall::RetryIncremented)
    }

    async fn ping(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Internal("status store unavailable".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// CONVERTER
// =============================================================================

#[derive(Debug, Clone)]
enum Script {
    Succeed,
    Fail(String),
    /// Fail this many more calls, then succeed.
    FailTimes(usize, String),
    Hang,
}

/// Converter whose behaviour is set by the test. On success it writes a
/// small PDF beside the input, named the way the real client names it.
pub struct ScriptedConverter {
    script: Mutex<Script>,
    calls: AtomicUsize,
}

impl ScriptedConverter {
    pub fn succeeding() -> Self {
        Self {
            script: Mutex::new(Script::Succeed),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_always(&self, message: &str) {
        *lock(&self.script) = Script::Fail(message.to_string());
    }

    pub fn fail_times(&self, times: usize, message: &str) {
        *lock(&self.script) = Script::FailTimes(times, message.to_string());
    }

    /// Never return; the attempt deadline has to fire.
    pub fn hang(&self) {
        *lock(&self.script) = Script::Hang;
    }

    pub fn succeed(&self) {
        *lock(&self.script) = Script::Succeed;
    }

    /// Number of `convert` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Script {
        let mut script = lock(&self.script);
        match &mut *script {
            Script::FailTimes(remaining, message) if *remaining > 0 => {
                *remaining -= 1;
                Script::Fail(message.clone())
            }
            Script::FailTimes(..) => {
                *script = Script::Succeed;
                Script::Succeed
            }
            other => other.clone(),
        }
    }
}

#[async_trait]
impl DocumentConverter for ScriptedConverter {
    async fn convert(&self, input: &Path, _source_type: &str) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next() {
            Script::Succeed => {
                let mut name = input.as_os_str().to_os_string();
                name.push(CONVERTED_SUFFIX);
                let output = PathBuf::from(name);
                tokio::fs::write(&output, b"%PDF-1.7\n%%EOF\n").await?;
                Ok(output)
            }
            Script::Fail(message) | Script::FailTimes(_, message) => {
                Err(Error::Conversion(message))
            }
            Script::Hang => std::future::pending().await,
        }
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
