//! Lloyd George Storage Library
//!
//! This crate provides the object storage abstraction used by the ingestion pipeline
//! and its implementations for S3, the local filesystem and memory.
//!
//! # Storage key format
//!
//! One bucket holds three areas, each under its own configurable prefix:
//!
//! - **Staging**: `{staging_prefix}/{path as submitted}`
//! - **Documents**: `{document_prefix}/{nhs_number}/{document_id}`
//! - **Reports**: `{report_prefix}/{date}/{ods_code}/{artifact}`
//!
//! Keys must not contain `..` or a leading `/`. Key generation is centralized in the
//! `keys` module so all backends stay consistent.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-memory")]
pub mod memory;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
pub use keys::StorageLayout;
pub use lg_core::StorageBackend;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-memory")]
pub use memory::MemoryStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{Storage, StorageError, StorageResult};
