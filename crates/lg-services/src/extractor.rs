//! Metadata extraction
//!
//! Turns one decoded [`IngestionMessage`] into the structured records the rest of the
//! pipeline works with. Document ids are derived from the NHS number and the staging
//! key, so a redelivered message addresses the same records.

use chrono::{DateTime, Utc};
use lg_core::models::{document_id_for, DocumentReference, FileEntry, IngestionMessage, MessageAction};
use lg_core::{validate_nhs_number, IngestError};
use lg_storage::StorageLayout;
use uuid::Uuid;

/// One file of a message, normalised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    pub document_id: Uuid,
    pub nhs_number: String,
    pub content_type: String,
    pub file_name: String,
    /// Path as submitted by the bureau.
    pub file_path: String,
    pub staging_key: String,
    pub permanent_key: String,
    pub scan_date: Option<String>,
}

impl ExtractedFile {
    /// The lifecycle record for this file, located in staging.
    pub fn to_document_reference(&self, uploader_ods_code: &str, now: DateTime<Utc>) -> DocumentReference {
        DocumentReference::new(
            self.document_id,
            &self.nhs_number,
            &self.content_type,
            &self.file_name,
            &self.staging_key,
            uploader_ods_code,
            now,
        )
    }
}

/// A whole message, normalised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMessage {
    pub action: MessageAction,
    pub nhs_number: String,
    pub uploader_ods_code: String,
    /// Declared file paths, joined, for the report row.
    pub file_path: String,
    pub files: Vec<ExtractedFile>,
}

#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    layout: StorageLayout,
}

impl MetadataExtractor {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn extract(&self, message: &IngestionMessage) -> Result<ExtractedMessage, IngestError> {
        let action = message.action()?;

        let nhs_number = validate_nhs_number(&required(
            Some(message.nhs_number_hint()),
            "nhs_number",
        )?)?;
        let uploader_ods_code = required(Some(message.uploader_hint()), "gp_practice_code")?;

        let entries = message.resolved_files();
        if action == MessageAction::Create && entries.is_empty() {
            return Err(IngestError::MalformedMetadata("file_path missing".to_string()));
        }

        let files = entries
            .iter()
            .map(|entry| self.extract_file(entry))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ExtractedMessage {
            action,
            nhs_number,
            uploader_ods_code,
            file_path: message.file_path_summary(),
            files,
        })
    }

    fn extract_file(&self, entry: &FileEntry) -> Result<ExtractedFile, IngestError> {
        let file_path = required(entry.file_path.clone(), "file_path")?;
        let nhs_number = validate_nhs_number(&required(entry.nhs_number.clone(), "nhs_number")?)?;
        required(entry.gp_practice_code.clone(), "gp_practice_code")?;

        let file_name = file_path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                IngestError::MalformedMetadata(format!("file name missing in {}", file_path))
            })?;

        let content_type = entry
            .content_type
            .as_deref()
            .map(|ct| ct.trim().to_lowercase())
            .filter(|ct| !ct.is_empty())
            .or_else(|| {
                mime_guess::from_path(&file_name)
                    .first()
                    .map(|mime| mime.essence_str().to_string())
            })
            .ok_or_else(|| {
                IngestError::MalformedMetadata(format!("content type missing for {}", file_name))
            })?;

        let staging_key = self.layout.staging_key(&file_path);
        let document_id = document_id_for(&nhs_number, &staging_key);
        let permanent_key = self.layout.document_key(&nhs_number, document_id);

        Ok(ExtractedFile {
            document_id,
            nhs_number,
            content_type,
            file_name,
            file_path,
            staging_key,
            permanent_key,
            scan_date: entry.scan_date.clone(),
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, IngestError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| IngestError::MalformedMetadata(format!("{} missing", field)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> MetadataExtractor {
        MetadataExtractor::new(StorageLayout::new("staging", "lloyd-george", "reports"))
    }

    fn parse(body: &str) -> IngestionMessage {
        IngestionMessage::parse(body).unwrap()
    }

    #[test]
    fn test_extract_single_file_message() {
        let message = parse(
            r#"{"nhs_number":"9000000009","gp_practice_code":"a12345","scan_date":"2024-01-01",
                "file_path":"/9000000009/1of1_Lloyd_George_Record.pdf"}"#,
        );
        let extracted = extractor().extract(&message).unwrap();

        assert_eq!(extracted.action, MessageAction::Create);
        assert_eq!(extracted.uploader_ods_code, "A12345");
        assert_eq!(extracted.files.len(), 1);

        let file = &extracted.files[0];
        assert_eq!(file.file_name, "1of1_Lloyd_George_Record.pdf");
        assert_eq!(file.content_type, "application/pdf");
        assert_eq!(file.staging_key, "staging/9000000009/1of1_Lloyd_George_Record.pdf");
        assert_eq!(
            file.permanent_key,
            format!("lloyd-george/9000000009/{}", file.document_id)
        );
        assert_eq!(file.scan_date.as_deref(), Some("2024-01-01"));
    }

    #[test]
    fn test_document_ids_are_deterministic() {
        let body = r#"{"nhs_number":"9000000009","gp_practice_code":"A12345",
            "files":[{"file_path":"/p/1of2_a.pdf"},{"file_path":"/p/2of2_a.pdf"}]}"#;
        let first = extractor().extract(&parse(body)).unwrap();
        let second = extractor().extract(&parse(body)).unwrap();

        assert_eq!(first, second);
        assert_ne!(first.files[0].document_id, first.files[1].document_id);
    }

    #[test]
    fn test_explicit_content_type_wins_over_extension() {
        let message = parse(
            r#"{"nhs_number":"9000000009","gp_practice_code":"A12345",
                "file_path":"/p/1of1_a.bin","content_type":"Application/PDF"}"#,
        );
        let extracted = extractor().extract(&message).unwrap();
        assert_eq!(extracted.files[0].content_type, "application/pdf");
    }

    #[test]
    fn test_unknown_extension_without_content_type_is_malformed() {
        let message = parse(
            r#"{"nhs_number":"9000000009","gp_practice_code":"A12345","file_path":"/p/1of1_a"}"#,
        );
        let err = extractor().extract(&message).unwrap_err();
        assert!(matches!(err, IngestError::MalformedMetadata(_)));
    }

    #[test]
    fn test_missing_fields_are_malformed_metadata() {
        let no_practice = parse(r#"{"nhs_number":"9000000009","file_path":"/p/1of1_a.pdf"}"#);
        let err = extractor().extract(&no_practice).unwrap_err();
        assert!(matches!(err, IngestError::MalformedMetadata(ref m) if m.contains("gp_practice_code")));

        let no_patient = parse(r#"{"gp_practice_code":"A12345","file_path":"/p/1of1_a.pdf"}"#);
        let err = extractor().extract(&no_patient).unwrap_err();
        assert!(matches!(err, IngestError::MalformedMetadata(ref m) if m.contains("nhs_number")));

        let no_path = parse(r#"{"nhs_number":"9000000009","gp_practice_code":"A12345"}"#);
        let err = extractor().extract(&no_path).unwrap_err();
        assert!(matches!(err, IngestError::MalformedMetadata(ref m) if m.contains("file_path")));
    }

    #[test]
    fn test_invalid_nhs_number_is_invalid_resource_id() {
        let message = parse(
            r#"{"nhs_number":"90000-0009","gp_practice_code":"A12345","file_path":"/p/1of1_a.pdf"}"#,
        );
        let err = extractor().extract(&message).unwrap_err();
        assert!(matches!(err, IngestError::InvalidResourceId(_)));
    }

    #[test]
    fn test_update_without_files_is_allowed() {
        let message = parse(
            r#"{"nhs_number":"9000000009","gp_practice_code":"B67890","action":"update"}"#,
        );
        let extracted = extractor().extract(&message).unwrap();
        assert_eq!(extracted.action, MessageAction::Update);
        assert!(extracted.files.is_empty());
        assert_eq!(extracted.file_path, "");
    }

    #[test]
    fn test_unknown_action_is_malformed_metadata() {
        let message = parse(
            r#"{"nhs_number":"9000000009","gp_practice_code":"A12345","action":"archive",
                "file_path":"/p/1of1_a.pdf"}"#,
        );
        assert!(matches!(
            extractor().extract(&message).unwrap_err(),
            IngestError::MalformedMetadata(_)
        ));
    }
}
