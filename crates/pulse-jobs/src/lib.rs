//! # pulse-jobs
//!
//! Reliable consumption of document conversion jobs.
//!
//! This crate provides:
//! - Atomic claiming from the pending list into processing
//! - Download, convert and upload under one per-attempt deadline
//! - Exponential-backoff retries through a tracked, flushable scheduler
//! - A periodic sweep that recovers entries stranded in processing
//! - A worker pool with graceful shutdown and an event channel
//!
//! ## Example
//!
//! ```ignore
//! use pulse_jobs::{Services, WorkerBuilder, WorkerConfig};
//!
//! let pool = WorkerBuilder::new(services)
//!     .with_config(WorkerConfig::from_config(&config))
//!     .build();
//!
//! let handle = pool.start();
//! let mut events = handle.events();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//! });
//!
//! let report = handle.shutdown().await;
//! ```

pub mod engine;
pub mod recovery;
pub mod scheduler;
pub mod testing;
pub mod worker;

pub use pulse_core::*;

pub use engine::{AttemptError, InFlight, LifecycleEngine, Services, Settlement, Step, Tick};
pub use recovery::{RecoverySweep, SweepReport};
pub use scheduler::{backoff_delay, FlushReport, RetryScheduler};
pub use worker::{
    ShutdownReport, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle, WorkerPool,
};
