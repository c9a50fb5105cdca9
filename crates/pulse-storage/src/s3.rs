//! Object store transfer between the bucket and local scratch space.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use tracing::{debug, instrument, warn};

use pulse_core::defaults::OUTPUT_CONTENT_TYPE;
use pulse_core::{Error, FileStorage, Result, S3Config};

/// Storage adapter over any [`ObjectStore`]: S3 in production, `InMemory`
/// in tests.
pub struct S3Storage {
    store: Arc<dyn ObjectStore>,
    scratch_dir: PathBuf,
}

impl S3Storage {
    pub fn new(store: Arc<dyn ObjectStore>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Build an S3 client from configuration.
    ///
    /// Empty credentials are left unset so the provider chain (environment,
    /// instance metadata) can supply them. A custom endpoint is addressed
    /// path-style, since virtual-hosted addressing would need the bucket
    /// baked into the endpoint.
    pub fn from_config(config: &S3Config, scratch_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);

        if !config.access_key.is_empty() {
            builder = builder.with_access_key_id(&config.access_key);
        }
        if !config.secret_key.is_empty() {
            builder = builder.with_secret_access_key(&config.secret_key);
        }
        match &config.endpoint {
            Some(endpoint) => {
                builder = builder
                    .with_endpoint(endpoint)
                    .with_allow_http(endpoint.starts_with("http://"))
                    .with_virtual_hosted_style_request(false);
            }
            None => {
                builder = builder.with_virtual_hosted_style_request(!config.use_path_style);
            }
        }

        let store = builder
            .build()
            .map_err(|e| Error::Config(format!("Invalid S3 configuration: {e}")))?;
        Ok(Self::new(Arc::new(store), scratch_dir))
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Underlying object store handle.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }
}

fn object_path(remote_path: &str) -> Result<ObjectPath> {
    ObjectPath::parse(remote_path.trim_start_matches('/'))
        .map_err(|e| Error::Storage(format!("invalid object key '{remote_path}': {e}")))
}

#[async_trait]
impl FileStorage for S3Storage {
    #[instrument(skip(self), fields(subsystem = "storage", component = "s3"))]
    async fn download(&self, remote_path: &str, local_name: &str) -> Result<PathBuf> {
        let start = Instant::now();

        // Only the final component of the hint is used; it must not escape
        // the scratch directory.
        let file_name = Path::new(local_name)
            .file_name()
            .ok_or_else(|| Error::Storage(format!("invalid local file name '{local_name}'")))?;
        let local_path = self.scratch_dir.join(file_name);

        tokio::fs::create_dir_all(&self.scratch_dir).await?;

        let location = object_path(remote_path)?;
        let data = self
            .store
            .get(&location)
            .await
            .map_err(|e| Error::Storage(format!("failed to download from S3: {e}")))?
            .bytes()
            .await
            .map_err(|e| Error::Storage(format!("failed to download from S3: {e}")))?;

        tokio::fs::write(&local_path, &data)
            .await
            .map_err(|e| Error::Storage(format!("failed to create local file: {e}")))?;

        debug!(
            local = %local_path.display(),
            size = data.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Downloaded object"
        );
        Ok(local_path)
    }

    #[instrument(skip(self), fields(subsystem = "storage", component = "s3"))]
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let start = Instant::now();
        let data = tokio::fs::read(local_path)
            .await
            .map_err(|e| Error::Storage(format!("failed to open file: {e}")))?;
        let size = data.len();

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, OUTPUT_CONTENT_TYPE.into());
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        let location = object_path(remote_path)?;
        self.store
            .put_opts(&location, PutPayload::from(data), options)
            .await
            .map_err(|e| Error::Storage(format!("failed to upload to S3: {e}")))?;

        debug!(
            size,
            duration_ms = start.elapsed().as_millis() as u64,
            "Uploaded object"
        );
        Ok(())
    }

    async fn cleanup(&self, local_path: &Path) -> Result<()> {
        match tokio::fs::remove_file(local_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(path = %local_path.display(), error = %e, "Failed to remove scratch file");
                Err(Error::Io(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn storage(dir: &tempfile::TempDir) -> (S3Storage, Arc<InMemory>) {
        let memory = Arc::new(InMemory::new());
        let storage = S3Storage::new(memory.clone(), dir.path().join("scratch"));
        (storage, memory)
    }

    #[tokio::test]
    async fn test_download_writes_scratch_file() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, memory) = storage(&dir);
        memory
            .put(
                &ObjectPath::from("uploads/abc.docx"),
                PutPayload::from(b"office bytes".to_vec()),
            )
            .await
            .unwrap();

        let local = storage
            .download("uploads/abc.docx", "abc-123.docx")
            .await
            .unwrap();
        assert_eq!(local, dir.path().join("scratch").join("abc-123.docx"));
        assert_eq!(std::fs::read(&local).unwrap(), b"office bytes");
    }

    #[tokio::test]
    async fn test_download_missing_object_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _) = storage(&dir);
        let err = storage
            .download("uploads/missing.docx", "missing.docx")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[tokio::test]
    async fn test_download_name_hint_cannot_escape_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, memory) = storage(&dir);
        memory
            .put(&ObjectPath::from("a/b.docx"), PutPayload::from(b"x".to_vec()))
            .await
            .unwrap();

        let local = storage.download("a/b.docx", "../../etc/evil.docx").await.unwrap();
        assert_eq!(local, dir.path().join("scratch").join("evil.docx"));
    }

    #[tokio::test]
    async fn test_upload_sets_pdf_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, memory) = storage(&dir);
        let local = dir.path().join("out.pdf");
        std::fs::write(&local, b"%PDF-1.4").unwrap();

        storage.upload(&local, "/converted/out.pdf").await.unwrap();

        let result = memory
            .get(&ObjectPath::from("converted/out.pdf"))
            .await
            .unwrap();
        assert_eq!(
            result
                .attributes
                .get(&Attribute::ContentType)
                .map(|v| v.to_string()),
            Some(OUTPUT_CONTENT_TYPE.to_string())
        );
        assert_eq!(result.bytes().await.unwrap().as_ref(), b"%PDF-1.4");
    }

    #[tokio::test]
    async fn test_upload_missing_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _) = storage(&dir);
        let err = storage
            .upload(&dir.path().join("nope.pdf"), "converted/nope.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _) = storage(&dir);
        let local = dir.path().join("tmp.docx");
        std::fs::write(&local, b"x").unwrap();

        storage.cleanup(&local).await.unwrap();
        assert!(!local.exists());
        storage.cleanup(&local).await.unwrap();
    }

    #[test]
    fn test_from_config_with_custom_endpoint() {
        let config = S3Config {
            bucket: "paperpulse".to_string(),
            region: "us-east-1".to_string(),
            access_key: "minio".to_string(),
            secret_key: "minio123".to_string(),
            endpoint: Some("http://minio:9000".to_string()),
            use_path_style: true,
        };
        let storage = S3Storage::from_config(&config, "/tmp/conversions").unwrap();
        assert_eq!(storage.scratch_dir(), Path::new("/tmp/conversions"));
    }
}
