//! Lloyd George persistence layer
//!
//! Document lifecycle records, the append-only upload report log and zip traces, each
//! behind a trait with a PostgreSQL and an in-memory implementation.

pub mod db;

pub use db::{
    create_stores, setup_database, DocumentReferenceStore, MemoryDocumentStore,
    MemoryUploadReportStore, MemoryZipTraceStore, PostgresDocumentStore,
    PostgresUploadReportStore, PostgresZipTraceStore, StoreError, StoreResult, Stores,
    Transition, UploadReportStore, ZipTraceStore,
};
