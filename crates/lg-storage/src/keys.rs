//! Shared key generation for storage backends.
//!
//! Key format: `{staging_prefix}/{submitted path}` for staged files,
//! `{document_prefix}/{nhs_number}/{document_id}` for accepted documents and
//! `{report_prefix}/{date}/{ods_code}/{artifact}` for report artifacts.

use chrono::NaiveDate;
use lg_core::Config;
use uuid::Uuid;

use crate::traits::{StorageError, StorageResult};

/// Reject keys that could escape their area or that no backend can address.
pub fn validate_key(storage_key: &str) -> StorageResult<()> {
    if storage_key.is_empty() {
        return Err(StorageError::InvalidKey("Storage key is empty".to_string()));
    }
    if storage_key.contains("..") || storage_key.starts_with('/') {
        return Err(StorageError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }
    Ok(())
}

fn clean_prefix(prefix: &str) -> String {
    prefix.trim_matches('/').to_string()
}

/// Prefixes of the staging, document and report areas of the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    staging_prefix: String,
    document_prefix: String,
    report_prefix: String,
}

impl StorageLayout {
    pub fn new(staging_prefix: &str, document_prefix: &str, report_prefix: &str) -> Self {
        StorageLayout {
            staging_prefix: clean_prefix(staging_prefix),
            document_prefix: clean_prefix(document_prefix),
            report_prefix: clean_prefix(report_prefix),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.staging_prefix(),
            config.document_prefix(),
            config.report_prefix(),
        )
    }

    pub fn staging_prefix(&self) -> &str {
        &self.staging_prefix
    }

    pub fn document_prefix(&self) -> &str {
        &self.document_prefix
    }

    pub fn report_prefix(&self) -> &str {
        &self.report_prefix
    }

    /// Staging key of a submitted file path. Paths that already carry the staging
    /// prefix are used as they are.
    pub fn staging_key(&self, file_path: &str) -> String {
        let trimmed = file_path.trim().trim_start_matches('/');
        let own_prefix = format!("{}/", self.staging_prefix);
        if trimmed.starts_with(&own_prefix) {
            trimmed.to_string()
        } else {
            format!("{}/{}", self.staging_prefix, trimmed)
        }
    }

    pub fn document_key(&self, nhs_number: &str, document_id: Uuid) -> String {
        format!("{}/{}/{}", self.document_prefix, nhs_number, document_id)
    }

    pub fn report_key(&self, date: NaiveDate, ods_code: &str, artifact: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.report_prefix,
            date.format("%Y-%m-%d"),
            ods_code,
            artifact
        )
    }
}
