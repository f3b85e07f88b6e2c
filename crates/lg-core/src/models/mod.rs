//! Data models for the ingestion pipeline
//!
//! This module contains the data structures shared by the pipeline, the stores and
//! the reporting job, organized by domain.

mod bulk_upload_report;
mod document_reference;
mod message;
mod ods_report;
mod zip_trace;

// Re-export all models for convenient imports
pub use bulk_upload_report::*;
pub use document_reference::*;
pub use message::*;
pub use ods_report::*;
pub use zip_trace::*;
