//! Daily report aggregation
//!
//! Folds the append-only outcome log of one UTC day into an [`OdsReport`] per uploading
//! organisation and writes the results as JSON artifacts. Artifacts are overwritten, so
//! re-running a day reproduces the same bytes.

use chrono::{NaiveDate, Utc};
use lg_core::models::{BulkUploadReport, DocumentZipTrace, OdsReport};
use lg_core::Config;
use lg_db::{StoreError, UploadReportStore, ZipTraceStore};
use lg_infra::{with_retry, RetryPolicy};
use lg_storage::{Storage, StorageError, StorageLayout};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const ODS_REPORT_ARTIFACT: &str = "ods_report.json";
pub const UPLOAD_ROWS_ARTIFACT: &str = "bulk_upload_report.json";
/// Report key used for rows whose uploader could not be determined.
pub const UNKNOWN_ODS_CODE: &str = "UNKNOWN";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to merge reports: {0}")]
    Merge(String),
}

/// One written artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifact {
    pub ods_code: String,
    pub key: String,
    pub url: String,
}

/// Fold rows of `date` into one report per uploader code, adding a zero-valued report
/// for each expected code without rows. Row order does not affect the result.
pub fn fold_reports(
    date: NaiveDate,
    rows: &[BulkUploadReport],
    expected_ods_codes: &[String],
) -> Result<BTreeMap<String, OdsReport>, ReportError> {
    let mut reports: BTreeMap<String, OdsReport> = BTreeMap::new();

    for row in rows.iter().filter(|row| row.date == date) {
        let code = report_code(&row.uploader_ods_code);
        let mut single = OdsReport::empty(code.clone(), date);
        single.record(row);
        reports
            .entry(code.clone())
            .or_insert_with(|| OdsReport::empty(code, date))
            .merge(&single)
            .map_err(|e| ReportError::Merge(e.to_string()))?;
    }

    for code in expected_ods_codes {
        let code = report_code(code);
        reports
            .entry(code.clone())
            .or_insert_with(|| OdsReport::empty(code, date));
    }

    Ok(reports)
}

fn report_code(uploader_ods_code: &str) -> String {
    let code = uploader_ods_code.trim().to_uppercase();
    if code.is_empty() {
        UNKNOWN_ODS_CODE.to_string()
    } else {
        code
    }
}

pub struct ReportAggregator {
    reports: Arc<dyn UploadReportStore>,
    storage: Arc<dyn Storage>,
    layout: StorageLayout,
    expected_ods_codes: Vec<String>,
    retry: RetryPolicy,
}

impl ReportAggregator {
    pub fn new(
        reports: Arc<dyn UploadReportStore>,
        storage: Arc<dyn Storage>,
        layout: StorageLayout,
        expected_ods_codes: Vec<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            reports,
            storage,
            layout,
            expected_ods_codes,
            retry,
        }
    }

    pub fn from_config(
        reports: Arc<dyn UploadReportStore>,
        storage: Arc<dyn Storage>,
        config: &Config,
    ) -> Self {
        Self::new(
            reports,
            storage,
            StorageLayout::from_config(config),
            config.report_ods_codes().to_vec(),
            RetryPolicy::from_config(config),
        )
    }

    /// Also emit zero-valued reports for `codes` when they have no rows.
    pub fn with_expected_codes(mut self, codes: impl IntoIterator<Item = String>) -> Self {
        for code in codes {
            let code = code.trim().to_uppercase();
            if !self.expected_ods_codes.contains(&code) {
                self.expected_ods_codes.push(code);
            }
        }
        self
    }

    async fn load_rows(&self, date: NaiveDate) -> Result<Vec<BulkUploadReport>, ReportError> {
        let mut rows = with_retry(&self.retry, "list report rows", StoreError::is_transient, || {
            self.reports.list_by_date(date)
        })
        .await?;
        rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    pub async fn aggregate(&self, date: NaiveDate) -> Result<Vec<OdsReport>, ReportError> {
        let rows = self.load_rows(date).await?;
        Ok(fold_reports(date, &rows, &self.expected_ods_codes)?
            .into_values()
            .collect())
    }

    /// Aggregate `date` and write `ods_report.json` and `bulk_upload_report.json` for
    /// every organisation.
    #[tracing::instrument(skip(self, date), fields(date = %date))]
    pub async fn persist(&self, date: NaiveDate) -> Result<Vec<ReportArtifact>, ReportError> {
        let rows = self.load_rows(date).await?;
        let reports = fold_reports(date, &rows, &self.expected_ods_codes)?;

        let mut artifacts = Vec::with_capacity(reports.len() * 2);
        for (code, report) in &reports {
            let org_rows: Vec<&BulkUploadReport> = rows
                .iter()
                .filter(|row| report_code(&row.uploader_ods_code) == *code)
                .collect();

            artifacts.push(
                self.write(code, date, ODS_REPORT_ARTIFACT, serde_json::to_vec_pretty(report)?)
                    .await?,
            );
            artifacts.push(
                self.write(code, date, UPLOAD_ROWS_ARTIFACT, serde_json::to_vec_pretty(&org_rows)?)
                    .await?,
            );

            tracing::info!(
                ods_code = %code,
                total_successful = report.total_successful,
                total_failed = report.total_failed(),
                "ODS report written"
            );
        }

        Ok(artifacts)
    }

    async fn write(
        &self,
        code: &str,
        date: NaiveDate,
        artifact: &str,
        body: Vec<u8>,
    ) -> Result<ReportArtifact, ReportError> {
        let key = self.layout.report_key(date, code, artifact);
        let url = with_retry(&self.retry, "storage upload", StorageError::is_transient, || {
            self.storage
                .upload_with_key(&key, body.clone(), "application/json")
        })
        .await?;
        Ok(ReportArtifact {
            ods_code: code.to_string(),
            key,
            url,
        })
    }

    /// Presigned download links for `artifacts`. Each link is traced with a 24 hour TTL.
    pub async fn presign(
        &self,
        artifacts: &[ReportArtifact],
        expires_in: Duration,
        traces: &dyn ZipTraceStore,
    ) -> Result<Vec<String>, ReportError> {
        let mut links = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let url = self
                .storage
                .get_presigned_url(&artifact.key, expires_in)
                .await?;
            traces
                .record(&DocumentZipTrace::new(&artifact.key, Utc::now()))
                .await?;
            links.push(url);
        }
        Ok(links)
    }
}
