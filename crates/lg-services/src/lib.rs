//! Lloyd George Services Layer
//!
//! This crate is the **business service layer** of the ingestion pipeline: metadata
//! extraction, file-set validation, the virus scan gate, storage relocation, the
//! demographics lookup and report aggregation. Each service talks to storage, the
//! stores and external collaborators only through traits, so the worker can assemble
//! them with real or in-memory backends.

#[cfg(feature = "clamav")]
pub mod clamav;
pub mod extractor;
pub mod pds;
pub mod relocation;
pub mod reporting;
pub mod validator;
pub mod virus_scan;

#[cfg(feature = "clamav")]
pub use clamav::ClamAvScanner;
pub use extractor::{ExtractedFile, ExtractedMessage, MetadataExtractor};
#[cfg(feature = "pds")]
pub use pds::PdsClient;
pub use pds::{DemographicsLookup, PdsError};
pub use relocation::{RelocationOutcome, StorageRelocator};
pub use reporting::{fold_reports, ReportAggregator, ReportArtifact, ReportError};
pub use validator::{parse_position, FileLocation, FileSetValidator, ValidatedFileSet};
pub use virus_scan::{ensure_bundle_clean, ScanError, VirusScanGate, VirusScanner};
