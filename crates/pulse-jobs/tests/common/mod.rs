//! Shared fixtures for the pulse-jobs integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use tokio::sync::broadcast;

use pulse_jobs::testing::{RecordingStatusStore, ScriptedConverter};
use pulse_jobs::{ConversionJob, JobQueue, Services, WorkerEvent};
use pulse_queue::MemoryQueue;
use pulse_storage::S3Storage;

pub const PENDING: &str = "conversion:pending";
pub const PROCESSING: &str = "conversion:processing";
pub const FAILED: &str = "conversion:failed";

/// Adapters backed by in-process doubles, with the sample input uploaded.
pub struct Fixture {
    pub queue: Arc<MemoryQueue>,
    pub status: Arc<RecordingStatusStore>,
    pub converter: Arc<ScriptedConverter>,
    pub objects: Arc<InMemory>,
    pub scratch: tempfile::TempDir,
}

impl Fixture {
    pub async fn new() -> Self {
        let objects = Arc::new(InMemory::new());
        objects
            .put(
                &ObjectPath::from("uploads/abc-123.docx"),
                PutPayload::from(b"office document".to_vec()),
            )
            .await
            .unwrap();

        Self {
            queue: Arc::new(MemoryQueue::new()),
            status: Arc::new(RecordingStatusStore::new()),
            converter: Arc::new(ScriptedConverter::succeeding()),
            objects,
            scratch: tempfile::tempdir().unwrap(),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            queue: self.queue.clone(),
            converter: self.converter.clone(),
            storage: Arc::new(S3Storage::new(self.objects.clone(), self.scratch.path())),
            status: self.status.clone(),
        }
    }

    pub async fn enqueue(&self, job: &ConversionJob) -> String {
        let entry = job.encode().unwrap();
        self.queue.push_head(PENDING, &entry).await.unwrap();
        entry
    }

    pub async fn push(&self, list: &str, entry: &str) {
        self.queue.push_head(list, entry).await.unwrap();
    }

    pub async fn list(&self, name: &str) -> Vec<String> {
        self.queue.range_all(name).await.unwrap()
    }
}

/// Wait for the first event matching `pred`, failing the test after `timeout`.
pub async fn wait_for<F>(
    events: &mut broadcast::Receiver<WorkerEvent>,
    timeout: Duration,
    mut pred: F,
) -> WorkerEvent
where
    F: FnMut(&WorkerEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for worker event")
}
