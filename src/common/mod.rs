//! Common module - shared helpers

pub mod retry;

pub use retry::{ExponentialBackoff, RetryConfig, retry_notify};
