//! Utility modules for hdm-ingest

pub mod retry;

pub use retry::{RetryError, RetryPolicy};
