//! Lloyd George Core Library
//!
//! This crate provides the domain models, error types, configuration and validation
//! shared by every component of the bulk ingestion pipeline.

pub mod config;
pub mod error;
pub mod models;
pub mod storage_types;
pub mod validation;

// Re-export commonly used types
pub use config::{BaseConfig, Config, IngestConfig};
pub use error::{ErrorMetadata, FailureClass, IngestError, LifecycleError, LogLevel};
pub use storage_types::StorageBackend;
pub use validation::{mask_nhs_number, validate_nhs_number};
