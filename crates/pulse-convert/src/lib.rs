//! # pulse-convert
//!
//! Client for the external document conversion service. Pure
//! request/response: retries belong to the lifecycle engine.

pub mod gotenberg;

pub use gotenberg::{output_path_for, GotenbergConverter};
