//! Database repositories for data access layer
//!
//! Each repository is a trait with a PostgreSQL implementation and an in-memory one.
//! The in-memory stores back local runs without `DATABASE_URL` and the test suites.
//
// Document lifecycle store
pub mod document_reference;
//
// Store errors
pub mod error;
//
// In-memory implementations
pub mod memory;
//
// Pool setup, migrations and store selection
pub mod setup;
//
// Upload outcome log
pub mod upload_report;
//
// Zip download traces
pub mod zip_trace;

pub use document_reference::{DocumentReferenceStore, PostgresDocumentStore, Transition};
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryDocumentStore, MemoryUploadReportStore, MemoryZipTraceStore};
pub use setup::{create_stores, setup_database, Stores};
pub use upload_report::{PostgresUploadReportStore, UploadReportStore};
pub use zip_trace::{PostgresZipTraceStore, ZipTraceStore};
