use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// ODS code the demographics service returns for suspended patients.
pub const SUSPENDED_ODS_CODE: &str = "SUSP";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Success,
    RegisteredElsewhere,
    Suspended,
    Failed,
}

impl UploadStatus {
    /// Outcome of a successful upload given the practice the patient is registered with.
    pub fn from_registration(uploader_ods_code: &str, pds_ods_code: &str) -> Self {
        if pds_ods_code.eq_ignore_ascii_case(SUSPENDED_ODS_CODE) {
            UploadStatus::Suspended
        } else if pds_ods_code.eq_ignore_ascii_case(uploader_ods_code) {
            UploadStatus::Success
        } else {
            UploadStatus::RegisteredElsewhere
        }
    }

    pub fn is_successful(&self) -> bool {
        !matches!(self, UploadStatus::Failed)
    }
}

impl Display for UploadStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            UploadStatus::Success => write!(f, "success"),
            UploadStatus::RegisteredElsewhere => write!(f, "registered_elsewhere"),
            UploadStatus::Suspended => write!(f, "suspended"),
            UploadStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for UploadStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(UploadStatus::Success),
            "registered_elsewhere" => Ok(UploadStatus::RegisteredElsewhere),
            "suspended" => Ok(UploadStatus::Suspended),
            "failed" => Ok(UploadStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid upload status: {}", s)),
        }
    }
}

/// Outcome of one ingestion attempt for one patient. Rows are append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkUploadReport {
    pub id: Uuid,
    pub nhs_number: String,
    pub upload_status: UploadStatus,
    pub timestamp: DateTime<Utc>,
    /// UTC calendar day of `timestamp`.
    pub date: NaiveDate,
    pub file_path: String,
    pub pds_ods_code: String,
    pub uploader_ods_code: String,
    pub failure_reason: Option<String>,
}

impl BulkUploadReport {
    pub fn success(
        nhs_number: impl Into<String>,
        file_path: impl Into<String>,
        uploader_ods_code: impl Into<String>,
        pds_ods_code: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let uploader_ods_code = uploader_ods_code.into();
        let pds_ods_code = pds_ods_code.into();
        let upload_status = UploadStatus::from_registration(&uploader_ods_code, &pds_ods_code);
        Self::build(
            nhs_number.into(),
            upload_status,
            file_path.into(),
            pds_ods_code,
            uploader_ods_code,
            None,
            timestamp,
        )
    }

    pub fn failed(
        nhs_number: impl Into<String>,
        file_path: impl Into<String>,
        uploader_ods_code: impl Into<String>,
        failure_reason: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::build(
            nhs_number.into(),
            UploadStatus::Failed,
            file_path.into(),
            String::new(),
            uploader_ods_code.into(),
            Some(failure_reason.into()),
            timestamp,
        )
    }

    fn build(
        nhs_number: String,
        upload_status: UploadStatus,
        file_path: String,
        pds_ods_code: String,
        uploader_ods_code: String,
        failure_reason: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        BulkUploadReport {
            id: Uuid::new_v4(),
            nhs_number,
            upload_status,
            timestamp,
            date: timestamp.date_naive(),
            file_path,
            pds_ods_code,
            uploader_ods_code,
            failure_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_date_is_utc_day_of_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 59).unwrap();
        let row = BulkUploadReport::failed("9000000009", "/a.pdf", "A12345", "bad", ts);
        assert_eq!(row.date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(row.upload_status, UploadStatus::Failed);
        assert_eq!(row.failure_reason.as_deref(), Some("bad"));
    }

    #[test]
    fn test_success_status_from_registration() {
        let ts = Utc::now();
        let same = BulkUploadReport::success("9000000009", "/a.pdf", "A12345", "a12345", ts);
        assert_eq!(same.upload_status, UploadStatus::Success);
        assert!(same.failure_reason.is_none());

        let elsewhere = BulkUploadReport::success("9000000009", "/a.pdf", "A12345", "B67890", ts);
        assert_eq!(elsewhere.upload_status, UploadStatus::RegisteredElsewhere);

        let suspended = BulkUploadReport::success("9000000009", "/a.pdf", "A12345", "SUSP", ts);
        assert_eq!(suspended.upload_status, UploadStatus::Suspended);
        assert!(suspended.upload_status.is_successful());
    }

    #[test]
    fn test_upload_status_parses_display() {
        for status in [
            UploadStatus::Success,
            UploadStatus::RegisteredElsewhere,
            UploadStatus::Suspended,
            UploadStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<UploadStatus>().unwrap(), status);
        }
        assert!("complete".parse::<UploadStatus>().is_err());
    }
}
