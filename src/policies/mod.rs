//! Retry policies for consumption.
//!
//! ## Contents
//! - [`RetryPolicy`]   how many recoverable failures are retried
//! - [`BackoffPolicy`] how retry delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid synchronized retries
//!
//! ## Quick wiring
//! ```text
//! Config { retry: RetryPolicy { max_retries, backoff } }
//!      └─► consume::EvaluationConsumer wraps every consumer call in retry.run(...)
//! ```
//!
//! ## Defaults
//! - `RetryPolicy::default()` → max_retries=2.
//! - `BackoffPolicy::default()` → first=100ms, factor=1.0 (constant), max=10s, jitter=None.

mod backoff;
mod jitter;
mod retry;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use retry::RetryPolicy;
