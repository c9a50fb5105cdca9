//! Status store implementation over the `file_conversions` table.
//!
//! Rows are created by the producer before a job is enqueued; this store only
//! updates them. A missing row is logged and otherwise ignored, since the
//! status record is an observational projection of the queue.

use async_trait::async_trait;
use serde_json::json;
use sqlx::{Pool, Postgres};
use tracing::{debug, instrument};

use pulse_core::{CompletionMetadata, ConversionStatus, Error, Result, StatusStore};

/// PostgreSQL implementation of StatusStore.
#[derive(Clone)]
pub struct PgStatusStore {
    pool: Pool<Postgres>,
}

impl PgStatusStore {
    /// Create a new PgStatusStore with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn note_rows(op: &'static str, conversion_id: i64, rows: u64) {
        if rows == 0 {
            debug!(
                subsystem = "database",
                component = "status",
                op,
                conversion_id,
                "No file_conversions row to update"
            );
        }
    }
}

#[async_trait]
impl StatusStore for PgStatusStore {
    #[instrument(skip(self), fields(subsystem = "database", component = "status"))]
    async fn set_processing(&self, conversion_id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE file_conversions
             SET status = $1, updated_at = NOW(), started_at = NOW()
             WHERE id = $2",
        )
        .bind(ConversionStatus::Processing.as_str())
        .bind(conversion_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::note_rows("set_processing", conversion_id, result.rows_affected());
        Ok(())
    }

    #[instrument(skip(self, metadata), fields(subsystem = "database", component = "status"))]
    async fn set_completed(
        &self,
        conversion_id: i64,
        output_path: &str,
        metadata: &CompletionMetadata,
    ) -> Result<()> {
        let metadata = json!({
            "worker_id": metadata.worker_id,
            "duration_ms": metadata.duration_ms,
        });

        let result = sqlx::query(
            "UPDATE file_conversions
             SET status = $1, updated_at = NOW(), completed_at = NOW(),
                 output_s3_path = $2, metadata = $3
             WHERE id = $4",
        )
        .bind(ConversionStatus::Completed.as_str())
        .bind(output_path)
        .bind(sqlx::types::Json(metadata))
        .bind(conversion_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::note_rows("set_completed", conversion_id, result.rows_affected());
        Ok(())
    }

    #[instrument(skip(self), fields(subsystem = "database", component = "status"))]
    async fn set_failed(&self, conversion_id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE file_conversions SET status = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(ConversionStatus::Failed.as_str())
        .bind(conversion_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::note_rows("set_failed", conversion_id, result.rows_affected());
        Ok(())
    }

    #[instrument(skip(self, message), fields(subsystem = "database", component = "status"))]
    async fn set_error(&self, conversion_id: i64, message: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE file_conversions SET error_message = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(message)
        .bind(conversion_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::note_rows("set_error", conversion_id, result.rows_affected());
        Ok(())
    }

    #[instrument(skip(self), fields(subsystem = "database", component = "status"))]
    async fn increment_retry_count(&self, conversion_id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE file_conversions
             SET retry_count = retry_count + 1, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(conversion_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::note_rows("increment_retry_count", conversion_id, result.rows_affected());
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}
