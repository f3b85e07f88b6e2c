//! Virus scan gate
//!
//! Every document carries a scanner verdict. The gate reads and records verdicts, runs
//! files through the configured [`VirusScanner`], and refuses a bundle unless every file
//! is `Clean`.

use async_trait::async_trait;
use lg_core::error::{REASON_SCAN_FAILED, REASON_SCAN_PENDING, REASON_VIRUS_DETECTED};
use lg_core::models::{DocumentReference, VirusScanResult};
use lg_core::{Config, IngestError, LifecycleError};
use lg_db::{DocumentReferenceStore, StoreError};
use lg_infra::{with_retry, RetryPolicy};
use lg_storage::{Storage, StorageError};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Scanner transport failures. A verdict, even `Infected`, is never an error.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Scanner unavailable: {0}")]
    Unavailable(String),

    #[error("Scan timed out after {0} seconds")]
    Timeout(u64),
}

impl ScanError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ScanError::Unavailable(_) | ScanError::Timeout(_))
    }
}

#[async_trait]
pub trait VirusScanner: Send + Sync {
    async fn scan(&self, file_name: &str, data: Vec<u8>) -> Result<VirusScanResult, ScanError>;
}

/// Fail a bundle unless every verdict is `Clean`. Infected wins over a failed scan,
/// which wins over a missing scan.
pub fn ensure_bundle_clean(records: &[DocumentReference]) -> Result<(), IngestError> {
    let has = |verdict: VirusScanResult| {
        records
            .iter()
            .any(|record| record.virus_scanner_result == verdict)
    };

    if has(VirusScanResult::Infected) {
        return Err(IngestError::file_set_invalid(REASON_VIRUS_DETECTED));
    }
    if has(VirusScanResult::Failed) {
        return Err(IngestError::file_set_invalid(REASON_SCAN_FAILED));
    }
    if has(VirusScanResult::NotScanned) {
        return Err(IngestError::file_set_invalid(REASON_SCAN_PENDING));
    }
    Ok(())
}

pub struct VirusScanGate {
    scanner: Option<Arc<dyn VirusScanner>>,
    documents: Arc<dyn DocumentReferenceStore>,
    storage: Arc<dyn Storage>,
    /// Record `Failed` when the scanner stays unreachable instead of surfacing an
    /// infrastructure failure.
    fail_closed: bool,
    retry: RetryPolicy,
}

impl VirusScanGate {
    pub fn new(
        scanner: Option<Arc<dyn VirusScanner>>,
        documents: Arc<dyn DocumentReferenceStore>,
        storage: Arc<dyn Storage>,
        fail_closed: bool,
        retry: RetryPolicy,
    ) -> Self {
        if scanner.is_none() {
            tracing::warn!("No virus scanner configured; uploads will fail the scan gate");
        }
        Self {
            scanner,
            documents,
            storage,
            fail_closed,
            retry,
        }
    }

    pub fn from_config(
        scanner: Option<Arc<dyn VirusScanner>>,
        documents: Arc<dyn DocumentReferenceStore>,
        storage: Arc<dyn Storage>,
        config: &Config,
    ) -> Self {
        Self::new(
            scanner,
            documents,
            storage,
            config.clamav_fail_closed(),
            RetryPolicy::from_config(config),
        )
    }

    pub async fn current_verdict(&self, id: Uuid) -> Result<VirusScanResult, IngestError> {
        let record = with_retry(&self.retry, "get document", StoreError::is_transient, || {
            self.documents.get(id)
        })
        .await
        .map_err(|e| e.into_ingest("read scan verdict"))?
        .ok_or(LifecycleError::NotFound(id))?;
        Ok(record.virus_scanner_result)
    }

    /// Update hook for verdicts produced outside the pipeline as well as by [`scan_file`].
    ///
    /// [`scan_file`]: VirusScanGate::scan_file
    pub async fn record_verdict(
        &self,
        id: Uuid,
        verdict: VirusScanResult,
    ) -> Result<DocumentReference, IngestError> {
        with_retry(&self.retry, "set scan verdict", StoreError::is_transient, || {
            self.documents.set_virus_scan_result(id, verdict)
        })
        .await
        .map_err(|e| e.into_ingest("record scan verdict"))
    }

    /// Scan the object at `storage_key` for document `id` and record the verdict. A file
    /// that already has a verdict is not rescanned.
    #[tracing::instrument(skip(self), fields(document_id = %id))]
    pub async fn scan_file(&self, id: Uuid, storage_key: &str) -> Result<VirusScanResult, IngestError> {
        let current = self.current_verdict(id).await?;
        if current != VirusScanResult::NotScanned {
            tracing::debug!(verdict = %current, "Verdict already recorded, skipping scan");
            return Ok(current);
        }

        let Some(scanner) = &self.scanner else {
            return Ok(VirusScanResult::NotScanned);
        };

        let data = with_retry(&self.retry, "storage download", StorageError::is_transient, || {
            self.storage.download(storage_key)
        })
        .await
        .map_err(|e| IngestError::infrastructure("download file for scan", e))?;

        let file_name = storage_key.rsplit('/').next().unwrap_or(storage_key);
        let verdict = match with_retry(&self.retry, "virus scan", ScanError::is_transient, || {
            scanner.scan(file_name, data.clone())
        })
        .await
        {
            Ok(verdict) => verdict,
            Err(err) if self.fail_closed => {
                tracing::error!(error = %err, "Virus scan failed, recording failed verdict");
                VirusScanResult::Failed
            }
            Err(err) => return Err(IngestError::infrastructure("virus scan", err)),
        };

        if verdict == VirusScanResult::Infected {
            tracing::warn!(storage_key, "Infected file detected");
        }
        self.record_verdict(id, verdict).await?;
        Ok(verdict)
    }
}
