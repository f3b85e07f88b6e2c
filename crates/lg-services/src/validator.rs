//! File-set validation
//!
//! A patient's bundle is only accepted when every declared `{k}of{N}_` part is present
//! exactly once, all parts belong to the same patient, and the bundle passes the
//! content-type and size limits.

use lg_core::{mask_nhs_number, Config, IngestError};
use lg_infra::{with_retry, RetryPolicy};
use lg_storage::{Storage, StorageError};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use crate::extractor::{ExtractedFile, ExtractedMessage};

static POSITION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+)of(\d+)_").expect("file position pattern is valid"));

/// Position `(k, N)` encoded in a file name such as `1of2_Lloyd_George_Record.pdf`.
pub fn parse_position(file_name: &str) -> Option<(u32, u32)> {
    let captures = POSITION_PATTERN.captures(file_name)?;
    let k = captures.get(1)?.as_str().parse().ok()?;
    let n = captures.get(2)?.as_str().parse().ok()?;
    Some((k, n))
}

/// Where a declared file currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLocation {
    Staging,
    /// Already moved by an earlier, partially completed attempt.
    Permanent,
}

impl FileLocation {
    pub fn key<'a>(&self, file: &'a ExtractedFile) -> &'a str {
        match self {
            FileLocation::Staging => &file.staging_key,
            FileLocation::Permanent => &file.permanent_key,
        }
    }
}

/// Outcome of a successful validation, in the order of the message's files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFileSet {
    pub locations: Vec<FileLocation>,
    pub total_bytes: u64,
}

pub struct FileSetValidator {
    storage: Arc<dyn Storage>,
    allowed_content_types: Vec<String>,
    min_bytes: u64,
    max_bytes: u64,
    retry: RetryPolicy,
}

impl FileSetValidator {
    pub fn new(
        storage: Arc<dyn Storage>,
        allowed_content_types: Vec<String>,
        min_bytes: u64,
        max_bytes: u64,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            storage,
            allowed_content_types: allowed_content_types
                .into_iter()
                .map(|ct| ct.trim().to_lowercase())
                .collect(),
            min_bytes,
            max_bytes,
            retry,
        }
    }

    pub fn from_config(storage: Arc<dyn Storage>, config: &Config) -> Self {
        Self::new(
            storage,
            config.allowed_content_types().to_vec(),
            config.min_file_set_bytes(),
            config.max_file_set_bytes(),
            RetryPolicy::from_config(config),
        )
    }

    #[tracing::instrument(
        skip(self, message),
        fields(nhs_number = %mask_nhs_number(&message.nhs_number), files = message.files.len())
    )]
    pub async fn validate(&self, message: &ExtractedMessage) -> Result<ValidatedFileSet, IngestError> {
        self.check_structure(message)?;

        let mut locations = Vec::with_capacity(message.files.len());
        let mut total_bytes: u64 = 0;
        for file in &message.files {
            let (location, size) = self.locate(file).await?;
            locations.push(location);
            total_bytes = total_bytes.saturating_add(size);
        }

        if total_bytes < self.min_bytes {
            return Err(IngestError::file_set_invalid(format!(
                "file set too small: {} bytes, minimum {}",
                total_bytes, self.min_bytes
            )));
        }
        if total_bytes > self.max_bytes {
            return Err(IngestError::file_set_invalid(format!(
                "file set too large: {} bytes, maximum {}",
                total_bytes, self.max_bytes
            )));
        }

        tracing::debug!(total_bytes, "File set validated");
        Ok(ValidatedFileSet {
            locations,
            total_bytes,
        })
    }

    /// Checks that need no storage access.
    pub fn check_structure(&self, message: &ExtractedMessage) -> Result<(), IngestError> {
        if message.files.is_empty() {
            return Err(IngestError::file_set_invalid("no files in set"));
        }

        if message
            .files
            .iter()
            .any(|file| file.nhs_number != message.nhs_number)
        {
            return Err(IngestError::file_set_invalid(
                "nhs number mismatch across file set",
            ));
        }

        let mut expected_total: Option<u32> = None;
        let mut positions = BTreeSet::new();
        for file in &message.files {
            let (k, n) = parse_position(&file.file_name).ok_or_else(|| {
                IngestError::file_set_invalid(format!(
                    "file name does not follow {{k}}of{{N}}_ naming: {}",
                    file.file_name
                ))
            })?;
            if k == 0 || k > n {
                return Err(IngestError::file_set_invalid(format!(
                    "invalid file position {} of {}: {}",
                    k, n, file.file_name
                )));
            }
            match expected_total {
                None => expected_total = Some(n),
                Some(total) if total != n => {
                    return Err(IngestError::file_set_invalid(
                        "inconsistent file count across file set",
                    ));
                }
                Some(_) => {}
            }
            if !positions.insert(k) {
                return Err(IngestError::file_set_invalid(format!(
                    "duplicate file position {}",
                    k
                )));
            }
        }

        if let Some(total) = expected_total {
            let missing: Vec<String> = (1..=total)
                .filter(|k| !positions.contains(k))
                .map(|k| k.to_string())
                .collect();
            if !missing.is_empty() {
                return Err(IngestError::file_set_invalid(format!(
                    "incomplete file set: expected {} files, missing position(s) {}",
                    total,
                    missing.join(", ")
                )));
            }
        }

        for file in &message.files {
            if !self.allowed_content_types.contains(&file.content_type) {
                return Err(IngestError::file_set_invalid(format!(
                    "content type {} not allowed: {}",
                    file.content_type, file.file_name
                )));
            }
        }

        Ok(())
    }

    async fn locate(&self, file: &ExtractedFile) -> Result<(FileLocation, u64), IngestError> {
        for location in [FileLocation::Staging, FileLocation::Permanent] {
            match self.object_size(location.key(file)).await {
                Ok(size) => return Ok((location, size)),
                Err(StorageError::NotFound(_)) => continue,
                Err(err) => return Err(IngestError::infrastructure("check staged file", err)),
            }
        }
        Err(IngestError::file_set_invalid(format!(
            "file not found: {}",
            file.file_path
        )))
    }

    async fn object_size(&self, key: &str) -> Result<u64, StorageError> {
        with_retry(&self.retry, "storage head", StorageError::is_transient, || {
            self.storage.content_length(key)
        })
        .await
    }
}
