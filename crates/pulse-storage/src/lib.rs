//! # pulse-storage
//!
//! Moves input documents from object storage into a local scratch directory
//! and uploads converted output back. Built on `object_store`, so tests can
//! swap S3 for an in-memory store.

pub mod s3;

pub use s3::S3Storage;
