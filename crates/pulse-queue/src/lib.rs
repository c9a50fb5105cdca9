//! # pulse-queue
//!
//! Queue adapters for the conversion worker: Redis lists in production and an
//! in-memory equivalent for tests. Both implement
//! [`pulse_core::JobQueue`] with the same atomic move-and-claim semantics.

pub mod memory;
pub mod redis_queue;

pub use memory::MemoryQueue;
pub use redis_queue::RedisQueue;
