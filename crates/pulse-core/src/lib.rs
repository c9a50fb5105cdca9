//! # pulse-core
//!
//! Core types, traits, and configuration for the PaperPulse conversion worker.
//!
//! This crate provides the job model shared with the producer, the adapter
//! traits the lifecycle engine drives, the common error type, and the
//! environment configuration surface.

pub mod config;
pub mod defaults;
pub mod error;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::{Config, DatabaseConfig, RedisConfig, S3Config};
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
