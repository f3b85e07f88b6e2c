//! Lloyd George Infrastructure Library
//!
//! Shared infrastructure used by the ingestion worker and the reporting job:
//! - Telemetry initialization (tracing-subscriber)
//! - Bounded retry with exponential backoff for collaborator calls

pub mod retry;

#[cfg(feature = "observability-basic")]
pub mod telemetry;

// Re-export commonly used types
pub use retry::{compute_retry_backoff, with_retry, RetryPolicy};

#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, shutdown_telemetry};
