use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::LifecycleError;

/// SNOMED CT code for the Lloyd George record folder.
pub const LLOYD_GEORGE_RECORD_TYPE: &str = "16521000000101";

/// Deterministic document id for a staged file of a patient.
///
/// Redelivered messages resolve to the same id, which makes `create` idempotent.
pub fn document_id_for(nhs_number: &str, staging_key: &str) -> Uuid {
    let name = format!("lloyd-george/{}/{}", nhs_number, staging_key);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
}

/// Lifecycle state derived from the `uploaded` and `deleted` timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Created,
    Uploaded,
    Deleted,
}

impl Display for DocumentStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DocumentStatus::Created => write!(f, "created"),
            DocumentStatus::Uploaded => write!(f, "uploaded"),
            DocumentStatus::Deleted => write!(f, "deleted"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VirusScanResult {
    #[default]
    NotScanned,
    Clean,
    Infected,
    Failed,
}

impl Display for VirusScanResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            VirusScanResult::NotScanned => write!(f, "NotScanned"),
            VirusScanResult::Clean => write!(f, "Clean"),
            VirusScanResult::Infected => write!(f, "Infected"),
            VirusScanResult::Failed => write!(f, "Failed"),
        }
    }
}

impl FromStr for VirusScanResult {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NotScanned" => Ok(VirusScanResult::NotScanned),
            "Clean" => Ok(VirusScanResult::Clean),
            "Infected" => Ok(VirusScanResult::Infected),
            "Failed" => Ok(VirusScanResult::Failed),
            _ => Err(anyhow::anyhow!("Invalid virus scan result: {}", s)),
        }
    }
}

/// Canonical field names of a document reference record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentReferenceField {
    Id,
    ContentType,
    Created,
    Deleted,
    FileName,
    FileLocation,
    NhsNumber,
    Ttl,
    DocType,
    VirusScannerResult,
    CurrentGpOds,
    Uploaded,
    Uploading,
    LastUpdated,
}

impl DocumentReferenceField {
    const ALL: [DocumentReferenceField; 14] = [
        DocumentReferenceField::Id,
        DocumentReferenceField::ContentType,
        DocumentReferenceField::Created,
        DocumentReferenceField::Deleted,
        DocumentReferenceField::FileName,
        DocumentReferenceField::FileLocation,
        DocumentReferenceField::NhsNumber,
        DocumentReferenceField::Ttl,
        DocumentReferenceField::DocType,
        DocumentReferenceField::VirusScannerResult,
        DocumentReferenceField::CurrentGpOds,
        DocumentReferenceField::Uploaded,
        DocumentReferenceField::Uploading,
        DocumentReferenceField::LastUpdated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentReferenceField::Id => "ID",
            DocumentReferenceField::ContentType => "ContentType",
            DocumentReferenceField::Created => "Created",
            DocumentReferenceField::Deleted => "Deleted",
            DocumentReferenceField::FileName => "FileName",
            DocumentReferenceField::FileLocation => "FileLocation",
            DocumentReferenceField::NhsNumber => "NhsNumber",
            DocumentReferenceField::Ttl => "TTL",
            DocumentReferenceField::DocType => "Type",
            DocumentReferenceField::VirusScannerResult => "VirusScannerResult",
            DocumentReferenceField::CurrentGpOds => "CurrentGpOds",
            DocumentReferenceField::Uploaded => "Uploaded",
            DocumentReferenceField::Uploading => "Uploading",
            DocumentReferenceField::LastUpdated => "LastUpdated",
        }
    }

    /// Every field of a persisted document reference. TTL only exists on transient
    /// records and is therefore not listed.
    pub fn list_all() -> Vec<DocumentReferenceField> {
        Self::ALL
            .iter()
            .copied()
            .filter(|field| *field != DocumentReferenceField::Ttl)
            .collect()
    }

    pub fn list_all_names() -> Vec<&'static str> {
        Self::list_all().iter().map(|field| field.as_str()).collect()
    }
}

impl Display for DocumentReferenceField {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

/// One scanned file of a patient's Lloyd George record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentReference {
    #[serde(rename = "ID")]
    pub id: Uuid,
    pub nhs_number: String,
    pub content_type: String,
    pub file_name: String,
    pub file_location: String,
    pub created: DateTime<Utc>,
    pub uploaded: Option<DateTime<Utc>>,
    pub deleted: Option<DateTime<Utc>>,
    pub virus_scanner_result: VirusScanResult,
    pub current_gp_ods: String,
    pub last_updated: DateTime<Utc>,
    #[serde(rename = "Type")]
    pub doc_type: String,
    pub uploading: bool,
    #[serde(rename = "TTL", default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

impl DocumentReference {
    pub fn new(
        id: Uuid,
        nhs_number: impl Into<String>,
        content_type: impl Into<String>,
        file_name: impl Into<String>,
        file_location: impl Into<String>,
        current_gp_ods: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        DocumentReference {
            id,
            nhs_number: nhs_number.into(),
            content_type: content_type.into(),
            file_name: file_name.into(),
            file_location: file_location.into(),
            created: now,
            uploaded: None,
            deleted: None,
            virus_scanner_result: VirusScanResult::NotScanned,
            current_gp_ods: current_gp_ods.into(),
            last_updated: now,
            doc_type: LLOYD_GEORGE_RECORD_TYPE.to_string(),
            uploading: false,
            ttl: None,
        }
    }

    pub fn status(&self) -> DocumentStatus {
        if self.deleted.is_some() {
            DocumentStatus::Deleted
        } else if self.uploaded.is_some() {
            DocumentStatus::Uploaded
        } else {
            DocumentStatus::Created
        }
    }

    pub fn is_live(&self) -> bool {
        self.deleted.is_none()
    }

    /// Payload compared when the same id is created twice.
    pub fn same_payload(&self, other: &DocumentReference) -> bool {
        self.nhs_number == other.nhs_number
            && self.content_type == other.content_type
            && self.file_name == other.file_name
            && self.current_gp_ods == other.current_gp_ods
            && self.doc_type == other.doc_type
    }

    fn reject(&self, operation: &'static str, reason: impl Into<String>) -> LifecycleError {
        LifecycleError::invalid_transition(self.id, operation, self.status(), reason)
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = now;
    }

    // Transition methods return `Ok(true)` when the record changed and `Ok(false)` for
    // idempotent no-ops, so stores only write when something moved.

    pub fn mark_uploaded(&mut self, now: DateTime<Utc>) -> Result<bool, LifecycleError> {
        if self.status() != DocumentStatus::Created {
            return Err(self.reject("mark uploaded", "document is not in created state"));
        }
        if self.virus_scanner_result != VirusScanResult::Clean {
            return Err(self.reject(
                "mark uploaded",
                format!("virus scan verdict is {}", self.virus_scanner_result),
            ));
        }
        self.uploaded = Some(now);
        self.uploading = false;
        self.touch(now);
        Ok(true)
    }

    pub fn mark_deleted(&mut self, now: DateTime<Utc>) -> Result<bool, LifecycleError> {
        if self.status() != DocumentStatus::Uploaded {
            return Err(self.reject("delete", "only uploaded documents can be deleted"));
        }
        self.deleted = Some(now);
        self.uploading = false;
        self.touch(now);
        Ok(true)
    }

    pub fn abort(&mut self, now: DateTime<Utc>) -> Result<bool, LifecycleError> {
        match self.status() {
            DocumentStatus::Created => {
                self.deleted = Some(now);
                self.uploading = false;
                self.touch(now);
                Ok(true)
            }
            DocumentStatus::Deleted if self.uploaded.is_none() => Ok(false),
            _ => Err(self.reject("abort", "document was already uploaded")),
        }
    }

    pub fn set_virus_scan_result(
        &mut self,
        verdict: VirusScanResult,
        now: DateTime<Utc>,
    ) -> Result<bool, LifecycleError> {
        if self.virus_scanner_result == verdict {
            return Ok(false);
        }
        if self.status() != DocumentStatus::Created {
            return Err(self.reject(
                "record scan result",
                "verdict cannot change once the document left created state",
            ));
        }
        self.virus_scanner_result = verdict;
        self.touch(now);
        Ok(true)
    }

    pub fn update_location(
        &mut self,
        location: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, LifecycleError> {
        if self.file_location == location {
            return Ok(false);
        }
        if self.status() == DocumentStatus::Deleted {
            return Err(self.reject("update location", "document is deleted"));
        }
        self.file_location = location.to_string();
        self.touch(now);
        Ok(true)
    }

    pub fn set_uploading(&mut self, flag: bool, now: DateTime<Utc>) -> Result<bool, LifecycleError> {
        if self.status() == DocumentStatus::Deleted {
            return Err(self.reject("set uploading", "document is deleted"));
        }
        if self.uploading == flag {
            return Ok(false);
        }
        self.uploading = flag;
        self.touch(now);
        Ok(true)
    }

    pub fn set_current_gp_ods(
        &mut self,
        ods_code: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, LifecycleError> {
        if self.status() == DocumentStatus::Deleted {
            return Err(self.reject("update practice", "document is deleted"));
        }
        if self.current_gp_ods == ods_code {
            return Ok(false);
        }
        self.current_gp_ods = ods_code.to_string();
        self.touch(now);
        Ok(true)
    }
}
