//! # pulse-db
//!
//! PostgreSQL status store for the conversion worker.
//!
//! This crate provides:
//! - Connection pool management
//! - The `file_conversions` status writer used by the lifecycle engine
//!
//! ## Example
//!
//! ```rust,ignore
//! use pulse_core::Config;
//! use pulse_db::Database;
//!
//! let config = Config::from_env();
//! let db = Database::connect(&config.database, config.worker_count).await?;
//! db.status.set_processing(42).await?;
//! ```

pub mod pool;
pub mod status;

pub use pool::{connect_options, create_pool, PoolConfig};
pub use status::PgStatusStore;

use pulse_core::{DatabaseConfig, Result};

/// Database context: the pool plus the status repository.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Status record writer.
    pub status: PgStatusStore,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            status: PgStatusStore::new(pool.clone()),
            pool,
        }
    }

    /// Connect using the status store settings, sizing the pool for
    /// `workers` concurrent loops.
    pub async fn connect(config: &DatabaseConfig, workers: usize) -> Result<Self> {
        let options = connect_options(config)?;
        let pool = create_pool(options, PoolConfig::for_workers(workers)).await?;
        Ok(Self::new(pool))
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
