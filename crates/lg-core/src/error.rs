//! Error types module
//!
//! Errors raised while ingesting a message are unified under [`IngestError`]. Each
//! variant self-describes, through [`ErrorMetadata`], whether it is a business
//! outcome (recorded as a failed report row), an infrastructure failure (retried at the
//! collaborator boundary, then recorded) or unprocessable input (dropped before the
//! pipeline runs).
//!
//! Lifecycle state machine violations have their own [`LifecycleError`] so stores can
//! return them without depending on the pipeline error type.

use std::fmt::Display;

use uuid::Uuid;

use crate::models::DocumentStatus;

/// Failure reason recorded when any file in a set has an infected verdict.
pub const REASON_VIRUS_DETECTED: &str = "virus detected";
/// Failure reason recorded when the scanner could not produce a verdict.
pub const REASON_SCAN_FAILED: &str = "scan failed";
/// Failure reason recorded when a file has not been scanned yet.
pub const REASON_SCAN_PENDING: &str = "virus scan not completed";

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for business failures worth surfacing in logs
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// How the intake boundary treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Input that never reached the pipeline. Dropped, no report row.
    Unprocessable,
    /// Business outcome. Always recorded as a report row.
    Business,
    /// Storage, persistence or network failure. Retried, then recorded.
    Infrastructure,
}

/// Metadata describing how an error should be handled and logged.
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "FILE_SET_INVALID")
    fn error_code(&self) -> &'static str;

    /// Whether retrying the same operation may succeed
    fn is_recoverable(&self) -> bool;

    /// Where the intake boundary routes this error
    fn failure_class(&self) -> FailureClass;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

/// Document lifecycle violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Document {0} already exists with a different payload")]
    DuplicateId(Uuid),

    #[error("Document not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid state transition for document {id}: cannot {operation} while {state} ({reason})")]
    InvalidStateTransition {
        id: Uuid,
        operation: &'static str,
        state: DocumentStatus,
        reason: String,
    },
}

impl LifecycleError {
    pub fn invalid_transition(
        id: Uuid,
        operation: &'static str,
        state: DocumentStatus,
        reason: impl Into<String>,
    ) -> Self {
        LifecycleError::InvalidStateTransition {
            id,
            operation,
            state,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Malformed metadata: {0}")]
    MalformedMetadata(String),

    #[error("Invalid resource id: {0}")]
    InvalidResourceId(String),

    #[error("File set invalid: {0}")]
    FileSetInvalid(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Infrastructure failure during {operation}: {message}")]
    Infrastructure { operation: String, message: String },
}

impl IngestError {
    pub fn file_set_invalid(reason: impl Into<String>) -> Self {
        IngestError::FileSetInvalid(reason.into())
    }

    pub fn infrastructure(operation: impl Into<String>, err: impl Display) -> Self {
        IngestError::Infrastructure {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// Text stored in `BulkUploadReport.failure_reason`.
    ///
    /// File-set reasons are passed through verbatim. Infrastructure reasons carry only
    /// the operation name so that report histograms group them stably.
    pub fn failure_reason(&self) -> String {
        match self {
            IngestError::MalformedMessage(msg) => format!("malformed message: {}", msg),
            IngestError::MalformedMetadata(msg) => format!("malformed metadata: {}", msg),
            IngestError::InvalidResourceId(_) => "invalid NHS number".to_string(),
            IngestError::FileSetInvalid(reason) => reason.clone(),
            IngestError::Lifecycle(err) => match err {
                LifecycleError::DuplicateId(_) => {
                    "document already exists with different metadata".to_string()
                }
                LifecycleError::NotFound(_) => "document record missing".to_string(),
                LifecycleError::InvalidStateTransition { operation, state, .. } => {
                    format!("cannot {} a document that is {}", operation, state)
                }
            },
            IngestError::Infrastructure { operation, .. } => {
                format!("infrastructure failure during {}", operation)
            }
        }
    }
}

/// Static metadata for each variant: (error_code, recoverable, class, log_level).
fn ingest_error_static_metadata(
    err: &IngestError,
) -> (&'static str, bool, FailureClass, LogLevel) {
    match err {
        IngestError::MalformedMessage(_) => (
            "MALFORMED_MESSAGE",
            false,
            FailureClass::Unprocessable,
            LogLevel::Error,
        ),
        IngestError::MalformedMetadata(_) => (
            "MALFORMED_METADATA",
            false,
            FailureClass::Business,
            LogLevel::Warn,
        ),
        IngestError::InvalidResourceId(_) => (
            "INVALID_RESOURCE_ID",
            false,
            FailureClass::Business,
            LogLevel::Warn,
        ),
        IngestError::FileSetInvalid(_) => (
            "FILE_SET_INVALID",
            false,
            FailureClass::Business,
            LogLevel::Debug,
        ),
        IngestError::Lifecycle(LifecycleError::DuplicateId(_)) => (
            "DUPLICATE_ID",
            false,
            FailureClass::Business,
            LogLevel::Warn,
        ),
        IngestError::Lifecycle(LifecycleError::NotFound(_)) => (
            "DOCUMENT_NOT_FOUND",
            false,
            FailureClass::Business,
            LogLevel::Warn,
        ),
        IngestError::Lifecycle(LifecycleError::InvalidStateTransition { .. }) => (
            "INVALID_STATE_TRANSITION",
            false,
            FailureClass::Business,
            LogLevel::Warn,
        ),
        IngestError::Infrastructure { .. } => (
            "INFRASTRUCTURE_FAILURE",
            true,
            FailureClass::Infrastructure,
            LogLevel::Error,
        ),
    }
}

impl ErrorMetadata for IngestError {
    fn error_code(&self) -> &'static str {
        ingest_error_static_metadata(self).0
    }

    fn is_recoverable(&self) -> bool {
        ingest_error_static_metadata(self).1
    }

    fn failure_class(&self) -> FailureClass {
        ingest_error_static_metadata(self).2
    }

    fn log_level(&self) -> LogLevel {
        ingest_error_static_metadata(self).3
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::MalformedMessage(format!("JSON parsing error: {}", err))
    }
}
