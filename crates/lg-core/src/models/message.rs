use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::error::IngestError;

/// What a message asks the pipeline to do for its patient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageAction {
    #[default]
    Create,
    Update,
    Delete,
}

impl Display for MessageAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MessageAction::Create => write!(f, "create"),
            MessageAction::Update => write!(f, "update"),
            MessageAction::Delete => write!(f, "delete"),
        }
    }
}

impl FromStr for MessageAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "create" => Ok(MessageAction::Create),
            "update" => Ok(MessageAction::Update),
            "delete" => Ok(MessageAction::Delete),
            _ => Err(anyhow::anyhow!("Invalid message action: {}", s)),
        }
    }
}

/// One file entry of a multi-file message. Missing fields fall back to the
/// message-level values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub nhs_number: Option<String>,
    #[serde(default)]
    pub gp_practice_code: Option<String>,
    #[serde(default)]
    pub scan_date: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Ingestion message as submitted by the scanning bureau.
///
/// Fields are optional at decode time so that a message with missing metadata still
/// yields a report row instead of being dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionMessage {
    #[serde(default)]
    pub nhs_number: Option<String>,
    #[serde(default)]
    pub gp_practice_code: Option<String>,
    #[serde(default)]
    pub scan_date: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

impl IngestionMessage {
    pub fn parse(body: &str) -> Result<Self, IngestError> {
        let message: IngestionMessage = serde_json::from_str(body)?;
        Ok(message)
    }

    pub fn action(&self) -> Result<MessageAction, IngestError> {
        match self.action.as_deref() {
            None => Ok(MessageAction::default()),
            Some(raw) => raw
                .parse()
                .map_err(|_| IngestError::MalformedMetadata(format!("unknown action {:?}", raw))),
        }
    }

    /// File entries with message-level values filled in. A single-file message yields
    /// one entry built from the top-level fields.
    pub fn resolved_files(&self) -> Vec<FileEntry> {
        if self.files.is_empty() {
            if self.file_path.is_none() {
                return Vec::new();
            }
            return vec![FileEntry {
                file_path: self.file_path.clone(),
                nhs_number: self.nhs_number.clone(),
                gp_practice_code: self.gp_practice_code.clone(),
                scan_date: self.scan_date.clone(),
                content_type: self.content_type.clone(),
            }];
        }

        self.files
            .iter()
            .map(|entry| FileEntry {
                file_path: entry.file_path.clone(),
                nhs_number: entry.nhs_number.clone().or_else(|| self.nhs_number.clone()),
                gp_practice_code: entry
                    .gp_practice_code
                    .clone()
                    .or_else(|| self.gp_practice_code.clone()),
                scan_date: entry.scan_date.clone().or_else(|| self.scan_date.clone()),
                content_type: entry
                    .content_type
                    .clone()
                    .or_else(|| self.content_type.clone()),
            })
            .collect()
    }

    /// Best-effort patient identifier for report rows of messages that fail extraction.
    pub fn nhs_number_hint(&self) -> String {
        self.nhs_number
            .clone()
            .or_else(|| self.files.iter().find_map(|f| f.nhs_number.clone()))
            .map(|n| n.trim().to_string())
            .unwrap_or_default()
    }

    /// Best-effort uploader code for report rows of messages that fail extraction.
    pub fn uploader_hint(&self) -> String {
        self.gp_practice_code
            .clone()
            .or_else(|| self.files.iter().find_map(|f| f.gp_practice_code.clone()))
            .map(|c| c.trim().to_uppercase())
            .unwrap_or_default()
    }

    /// Declared file paths joined for the report row.
    pub fn file_path_summary(&self) -> String {
        self.resolved_files()
            .iter()
            .filter_map(|f| f.file_path.as_deref())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Whether this is a create message in the single-file form.
    pub fn is_single_file_create(&self) -> bool {
        self.files.is_empty()
            && self.file_path.is_some()
            && matches!(self.action(), Ok(MessageAction::Create))
    }

    /// One multi-file create message carrying the files of `parts`. Message-level
    /// fields come from the first part; a path declared twice is kept once.
    pub fn from_parts(parts: &[IngestionMessage]) -> Self {
        let mut files: Vec<FileEntry> = Vec::new();
        for entry in parts.iter().flat_map(IngestionMessage::resolved_files) {
            if !files.iter().any(|f| f.file_path == entry.file_path) {
                files.push(entry);
            }
        }

        let first = parts.first();
        IngestionMessage {
            nhs_number: first.and_then(|m| m.nhs_number.clone()),
            gp_practice_code: first.and_then(|m| m.gp_practice_code.clone()),
            scan_date: first.and_then(|m| m.scan_date.clone()),
            files,
            ..IngestionMessage::default()
        }
    }
}

/// Queue event delivered to the intake layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueEvent {
    #[serde(rename = "Records", default, skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<QueueRecord>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueRecord {
    #[serde(rename = "messageId", default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl QueueRecord {
    pub fn new(message_id: impl Into<String>, body: impl Into<String>) -> Self {
        QueueRecord {
            message_id: Some(message_id.into()),
            body: Some(body.into()),
        }
    }
}
