//! Message intake and failure isolation.
//!
//! Each message of a batch is handled on its own: a message that cannot be decoded is
//! dropped and logged, every other message yields exactly one report row, whatever
//! happened inside the pipeline. Nothing a single message does can stop the batch.
//!
//! A multi-part set may also arrive as one single-file message per part. Parts of the
//! same set within a batch are merged and run through the pipeline together; each part
//! message still gets its own row.

use chrono::Utc;
use lg_core::models::{BulkUploadReport, IngestionMessage, QueueEvent, QueueRecord};
use lg_core::{mask_nhs_number, ErrorMetadata, FailureClass, IngestError, LogLevel};
use lg_db::{StoreError, UploadReportStore};
use lg_infra::{with_retry, RetryPolicy};
use lg_services::parse_position;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use crate::context::IngestContext;
use crate::pipeline::UploadPipeline;

/// What happened to one queue message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// A report row was produced and stored.
    Recorded(BulkUploadReport),
    /// A report row was produced but could not be stored.
    Unrecorded { row: BulkUploadReport, error: String },
    /// The message could not be decoded. No row.
    Dropped { reason: String },
}

impl MessageOutcome {
    pub fn row(&self) -> Option<&BulkUploadReport> {
        match self {
            MessageOutcome::Recorded(row) | MessageOutcome::Unrecorded { row, .. } => Some(row),
            MessageOutcome::Dropped { .. } => None,
        }
    }

    /// Whether the message is finished with and may be removed from the queue. Dropped
    /// messages can never succeed, unrecorded ones should be delivered again.
    pub fn is_settled(&self) -> bool {
        !matches!(self, MessageOutcome::Unrecorded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedMessage {
    pub message_id: Option<String>,
    pub outcome: MessageOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub messages: Vec<ProcessedMessage>,
}

impl BatchSummary {
    pub fn rows(&self) -> Vec<&BulkUploadReport> {
        self.messages
            .iter()
            .filter_map(|message| message.outcome.row())
            .collect()
    }

    pub fn dropped(&self) -> usize {
        self.messages
            .iter()
            .filter(|message| matches!(message.outcome, MessageOutcome::Dropped { .. }))
            .count()
    }

    pub fn unrecorded(&self) -> usize {
        self.messages
            .iter()
            .filter(|message| !message.outcome.is_settled())
            .count()
    }
}

pub struct BatchProcessor {
    pipeline: Arc<UploadPipeline>,
    reports: Arc<dyn UploadReportStore>,
    retry: RetryPolicy,
}

impl BatchProcessor {
    pub fn new(
        pipeline: Arc<UploadPipeline>,
        reports: Arc<dyn UploadReportStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            pipeline,
            reports,
            retry,
        }
    }

    /// Handle a raw queue event. An event that is not a queue event, or has no
    /// `Records`, produces nothing.
    pub async fn process_event(&self, raw_event: &str) -> BatchSummary {
        let event: QueueEvent = match serde_json::from_str(raw_event) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "Queue event could not be decoded, nothing processed");
                return BatchSummary::default();
            }
        };

        match event.records {
            Some(records) => self.process_batch(&records).await,
            None => {
                tracing::info!("Queue event has no records");
                BatchSummary::default()
            }
        }
    }

    pub async fn process_batch(&self, records: &[QueueRecord]) -> BatchSummary {
        let batch_id = Uuid::new_v4();
        tracing::info!(batch_id = %batch_id, messages = records.len(), "Processing batch");

        let mut outcomes: Vec<Option<MessageOutcome>> = vec![None; records.len()];
        let mut decoded = Vec::with_capacity(records.len());
        for (position, record) in records.iter().enumerate() {
            let ctx = IngestContext::new(batch_id, record.message_id.as_deref(), position);
            match ctx.span().in_scope(|| decode(record)) {
                Ok(message) => decoded.push((position, message)),
                Err(outcome) => outcomes[position] = Some(outcome),
            }
        }

        for unit in group_file_sets(decoded) {
            let first = unit.positions[0];
            let ctx = IngestContext::new(batch_id, records[first].message_id.as_deref(), first);
            let unit_outcomes = self.process_unit(&ctx, &unit).instrument(ctx.span()).await;
            for (position, outcome) in unit.positions.iter().zip(unit_outcomes) {
                outcomes[*position] = Some(outcome);
            }
        }

        let messages = records
            .iter()
            .zip(outcomes)
            .map(|(record, outcome)| ProcessedMessage {
                message_id: record.message_id.clone(),
                outcome: outcome.unwrap_or_else(|| MessageOutcome::Dropped {
                    reason: "message not processed".to_string(),
                }),
            })
            .collect();

        let summary = BatchSummary { batch_id, messages };
        tracing::info!(
            batch_id = %batch_id,
            rows = summary.rows().len(),
            dropped = summary.dropped(),
            unrecorded = summary.unrecorded(),
            "Batch processed"
        );
        summary
    }

    /// Run the pipeline once for a unit and produce one outcome per member message.
    async fn process_unit(&self, ctx: &IngestContext, unit: &FileSetUnit) -> Vec<MessageOutcome> {
        if unit.members.len() > 1 {
            tracing::info!(messages = unit.members.len(), "Single-file messages merged into one file set");
        }

        let now = Utc::now();
        let rows: Vec<BulkUploadReport> = match self.pipeline.handle(ctx, &unit.message).await {
            Ok(outcome) => unit
                .members
                .iter()
                .map(|member| outcome.report_for(member.file_path_summary(), now))
                .collect(),
            Err(err) if err.failure_class() == FailureClass::Unprocessable => {
                return unit.members.iter().map(|_| dropped(&err)).collect();
            }
            Err(err) => {
                log_failure(&err);
                unit.members
                    .iter()
                    .map(|member| {
                        BulkUploadReport::failed(
                            member.nhs_number_hint(),
                            member.file_path_summary(),
                            member.uploader_hint(),
                            err.failure_reason(),
                            now,
                        )
                    })
                    .collect()
            }
        };

        let mut outcomes = Vec::with_capacity(rows.len());
        for row in rows {
            outcomes.push(self.record(row).await);
        }
        outcomes
    }

    async fn record(&self, row: BulkUploadReport) -> MessageOutcome {
        match with_retry(&self.retry, "append report row", StoreError::is_transient, || {
            self.reports.append(&row)
        })
        .await
        {
            Ok(()) => {
                tracing::info!(
                    nhs_number = %mask_nhs_number(&row.nhs_number),
                    upload_status = %row.upload_status,
                    "Outcome recorded"
                );
                MessageOutcome::Recorded(row)
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to record outcome row");
                MessageOutcome::Unrecorded {
                    row,
                    error: err.to_string(),
                }
            }
        }
    }
}

/// Messages handled by one pipeline run.
struct FileSetUnit {
    positions: Vec<usize>,
    members: Vec<IngestionMessage>,
    message: IngestionMessage,
}

/// Group single-file create messages that declare parts of the same multi-part set
/// (same patient, uploader and part count). Everything else runs on its own.
fn group_file_sets(decoded: Vec<(usize, IngestionMessage)>) -> Vec<FileSetUnit> {
    let mut units: Vec<FileSetUnit> = Vec::with_capacity(decoded.len());
    let mut open_sets: HashMap<(String, String, u32), usize> = HashMap::new();

    for (position, message) in decoded {
        let Some(key) = file_set_key(&message) else {
            units.push(FileSetUnit {
                positions: vec![position],
                message: message.clone(),
                members: vec![message],
            });
            continue;
        };

        match open_sets.get(&key) {
            Some(&index) => {
                let unit = &mut units[index];
                unit.positions.push(position);
                unit.members.push(message);
                unit.message = IngestionMessage::from_parts(&unit.members);
            }
            None => {
                open_sets.insert(key, units.len());
                units.push(FileSetUnit {
                    positions: vec![position],
                    message: message.clone(),
                    members: vec![message],
                });
            }
        }
    }
    units
}

fn file_set_key(message: &IngestionMessage) -> Option<(String, String, u32)> {
    if !message.is_single_file_create() {
        return None;
    }
    let nhs_number = message.nhs_number_hint();
    let uploader = message.uploader_hint();
    if nhs_number.is_empty() || uploader.is_empty() {
        return None;
    }

    let file_path = message.file_path.as_deref()?;
    let file_name = file_path.rsplit('/').find(|segment| !segment.is_empty())?;
    let (_, total) = parse_position(file_name)?;
    (total > 1).then_some((nhs_number, uploader, total))
}

fn decode(record: &QueueRecord) -> Result<IngestionMessage, MessageOutcome> {
    let Some(body) = record.body.as_deref() else {
        return Err(dropped(&IngestError::MalformedMessage(
            "message has no body".to_string(),
        )));
    };
    IngestionMessage::parse(body).map_err(|err| dropped(&err))
}

fn dropped(err: &IngestError) -> MessageOutcome {
    tracing::error!(error_code = err.error_code(), error = %err, "Message dropped");
    MessageOutcome::Dropped {
        reason: err.to_string(),
    }
}

fn log_failure(err: &IngestError) {
    match err.log_level() {
        LogLevel::Debug => tracing::debug!(error_code = err.error_code(), error = %err, "Upload failed"),
        LogLevel::Warn => tracing::warn!(error_code = err.error_code(), error = %err, "Upload failed"),
        LogLevel::Error => tracing::error!(error_code = err.error_code(), error = %err, "Upload failed"),
    }
}
