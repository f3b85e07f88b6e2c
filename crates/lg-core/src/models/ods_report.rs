use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::bulk_upload_report::{BulkUploadReport, UploadStatus};

/// Daily upload statistics for one uploading organisation.
///
/// Registered-elsewhere and suspended uploads are successful uploads, so they count
/// towards `total_successful` as well as their own counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OdsReport {
    pub uploader_ods_code: String,
    pub date: NaiveDate,
    pub total_successful: u64,
    pub total_registered_elsewhere: u64,
    pub total_suspended: u64,
    pub failure_reasons: BTreeMap<String, u64>,
}

impl OdsReport {
    pub fn empty(uploader_ods_code: impl Into<String>, date: NaiveDate) -> Self {
        OdsReport {
            uploader_ods_code: uploader_ods_code.into(),
            date,
            total_successful: 0,
            total_registered_elsewhere: 0,
            total_suspended: 0,
            failure_reasons: BTreeMap::new(),
        }
    }

    /// Fold rows into a report. Rows belonging to another organisation or day are ignored.
    pub fn from_rows<'a>(
        uploader_ods_code: impl Into<String>,
        date: NaiveDate,
        rows: impl IntoIterator<Item = &'a BulkUploadReport>,
    ) -> Self {
        let mut report = OdsReport::empty(uploader_ods_code, date);
        for row in rows {
            if row.uploader_ods_code == report.uploader_ods_code && row.date == report.date {
                report.record(row);
            }
        }
        report
    }

    pub fn record(&mut self, row: &BulkUploadReport) {
        match row.upload_status {
            UploadStatus::Success => self.total_successful += 1,
            UploadStatus::RegisteredElsewhere => {
                self.total_successful += 1;
                self.total_registered_elsewhere += 1;
            }
            UploadStatus::Suspended => {
                self.total_successful += 1;
                self.total_suspended += 1;
            }
            UploadStatus::Failed => {
                let reason = row
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string());
                *self.failure_reasons.entry(reason).or_insert(0) += 1;
            }
        }
    }

    /// Combine two partial reports of the same organisation and day.
    pub fn merge(&mut self, other: &OdsReport) -> Result<(), anyhow::Error> {
        if self.uploader_ods_code != other.uploader_ods_code || self.date != other.date {
            return Err(anyhow::anyhow!(
                "cannot merge report for ({}, {}) into ({}, {})",
                other.uploader_ods_code,
                other.date,
                self.uploader_ods_code,
                self.date
            ));
        }
        self.total_successful += other.total_successful;
        self.total_registered_elsewhere += other.total_registered_elsewhere;
        self.total_suspended += other.total_suspended;
        for (reason, count) in &other.failure_reasons {
            *self.failure_reasons.entry(reason.clone()).or_insert(0) += count;
        }
        Ok(())
    }

    pub fn total_failed(&self) -> u64 {
        self.failure_reasons.values().sum()
    }

    pub fn total_uploads(&self) -> u64 {
        self.total_successful + self.total_failed()
    }
}
