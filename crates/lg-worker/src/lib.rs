//! Lloyd George ingestion worker
//!
//! Wires the services into the per-message [`UploadPipeline`], isolates messages from
//! each other in the [`BatchProcessor`] and feeds it from a queue through the
//! [`QueueConsumer`].

pub mod consumer;
pub mod context;
pub mod intake;
pub mod pipeline;
#[cfg(feature = "sqs")]
pub mod sqs;

pub use consumer::{poll_once, process_received, MessageSource, QueueConsumer, ReceivedMessage};
pub use context::IngestContext;
pub use intake::{BatchProcessor, BatchSummary, MessageOutcome, ProcessedMessage};
pub use pipeline::{PipelineSettings, UploadOutcome, UploadPipeline, REASON_NO_DOCUMENTS};
#[cfg(feature = "sqs")]
pub use sqs::SqsSource;
