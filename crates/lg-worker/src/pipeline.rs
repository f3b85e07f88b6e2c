//! Ingestion pipeline for one message.
//!
//! Create: extract, validate the file set, look up the patient's practice, create the
//! lifecycle records, scan, gate, relocate, mark uploaded. When the set is rejected after
//! record creation, records that never reached `Uploaded` are aborted. Infrastructure
//! failures leave them in `Created` so a redelivery of the message resumes the work.
//!
//! Update and Delete act on every live document of the patient.

use chrono::{DateTime, Utc};
use lg_core::models::{
    BulkUploadReport, DocumentReference, DocumentStatus, IngestionMessage, MessageAction,
};
use lg_core::{mask_nhs_number, Config, ErrorMetadata, FailureClass, IngestError, LifecycleError};
use lg_db::{DocumentReferenceStore, StoreError, StoreResult};
use lg_infra::{with_retry, RetryPolicy};
use lg_services::{
    ensure_bundle_clean, DemographicsLookup, ExtractedMessage, FileSetValidator,
    MetadataExtractor, PdsError, StorageRelocator, ValidatedFileSet, VirusScanGate,
    VirusScanner,
};
use lg_storage::{Storage, StorageLayout};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::IngestContext;

/// Failure reason for Update and Delete messages of a patient without live documents.
pub const REASON_NO_DOCUMENTS: &str = "no documents found for patient";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub allowed_content_types: Vec<String>,
    pub min_file_set_bytes: u64,
    pub max_file_set_bytes: u64,
    pub clamav_fail_closed: bool,
    pub retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            allowed_content_types: vec!["application/pdf".to_string()],
            min_file_set_bytes: 1,
            max_file_set_bytes: 1024 * 1024 * 1024,
            clamav_fail_closed: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            allowed_content_types: config.allowed_content_types().to_vec(),
            min_file_set_bytes: config.min_file_set_bytes(),
            max_file_set_bytes: config.max_file_set_bytes(),
            clamav_fail_closed: config.clamav_fail_closed(),
            retry: RetryPolicy::from_config(config),
        }
    }
}

/// What a successfully handled message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub action: MessageAction,
    pub nhs_number: String,
    pub uploader_ods_code: String,
    pub pds_ods_code: String,
    pub file_path: String,
    /// Documents touched by this message.
    pub documents: usize,
}

impl UploadOutcome {
    /// Success row for one of the messages that made up this outcome.
    pub fn report_for(&self, file_path: String, timestamp: DateTime<Utc>) -> BulkUploadReport {
        BulkUploadReport::success(
            self.nhs_number.clone(),
            file_path,
            self.uploader_ods_code.clone(),
            self.pds_ods_code.clone(),
            timestamp,
        )
    }
}

pub struct UploadPipeline {
    extractor: MetadataExtractor,
    validator: FileSetValidator,
    gate: VirusScanGate,
    relocator: StorageRelocator,
    documents: Arc<dyn DocumentReferenceStore>,
    demographics: Option<Arc<dyn DemographicsLookup>>,
    retry: RetryPolicy,
}

impl UploadPipeline {
    pub fn new(
        layout: StorageLayout,
        storage: Arc<dyn Storage>,
        documents: Arc<dyn DocumentReferenceStore>,
        scanner: Option<Arc<dyn VirusScanner>>,
        demographics: Option<Arc<dyn DemographicsLookup>>,
        settings: PipelineSettings,
    ) -> Self {
        let validator = FileSetValidator::new(
            storage.clone(),
            settings.allowed_content_types,
            settings.min_file_set_bytes,
            settings.max_file_set_bytes,
            settings.retry,
        );
        let gate = VirusScanGate::new(
            scanner,
            documents.clone(),
            storage.clone(),
            settings.clamav_fail_closed,
            settings.retry,
        );
        let relocator = StorageRelocator::new(storage, documents.clone(), settings.retry);

        Self {
            extractor: MetadataExtractor::new(layout),
            validator,
            gate,
            relocator,
            documents,
            demographics,
            retry: settings.retry,
        }
    }

    /// Run one decoded message. Every error returned here becomes a failure row at the
    /// intake boundary.
    pub async fn handle(
        &self,
        ctx: &IngestContext,
        message: &IngestionMessage,
    ) -> Result<UploadOutcome, IngestError> {
        let extracted = self.extractor.extract(message)?;
        tracing::debug!(
            correlation_id = %ctx.correlation_id,
            action = %extracted.action,
            nhs_number = %mask_nhs_number(&extracted.nhs_number),
            files = extracted.files.len(),
            "Message extracted"
        );

        match extracted.action {
            MessageAction::Create => self.create(&extracted).await,
            MessageAction::Update => self.update(&extracted).await,
            MessageAction::Delete => self.delete(&extracted).await,
        }
    }

    async fn create(&self, message: &ExtractedMessage) -> Result<UploadOutcome, IngestError> {
        let validated = self.validator.validate(message).await?;
        let pds_ods_code = self.registered_practice(message).await?;
        let records = self.create_records(message).await?;
        let outcome = self.outcome(message, pds_ods_code, records.len());

        if records
            .iter()
            .all(|record| record.status() == DocumentStatus::Uploaded)
        {
            tracing::info!("File set already uploaded, nothing to do");
            return Ok(outcome);
        }

        match self.complete(message, &validated, &records).await {
            Ok(()) => {
                tracing::info!(documents = records.len(), "File set uploaded");
                Ok(outcome)
            }
            Err(err) => {
                if err.failure_class() == FailureClass::Infrastructure {
                    tracing::warn!(
                        error = %err,
                        "File set left in created state for redelivery"
                    );
                } else {
                    self.abort_unfinished(&records).await;
                }
                Err(err)
            }
        }
    }

    async fn create_records(
        &self,
        message: &ExtractedMessage,
    ) -> Result<Vec<DocumentReference>, IngestError> {
        let now = Utc::now();
        let mut records = Vec::with_capacity(message.files.len());

        for file in &message.files {
            let record = file.to_document_reference(&message.uploader_ods_code, now);
            match self
                .store_call("create document reference", || self.documents.create(&record))
                .await
            {
                Ok(stored) => records.push(stored),
                Err(err) => {
                    if err.failure_class() != FailureClass::Infrastructure {
                        self.abort_unfinished(&records).await;
                    }
                    return Err(err);
                }
            }
        }

        if let Some(removed) = records
            .iter()
            .find(|record| record.status() == DocumentStatus::Deleted)
        {
            let reason = format!("document previously removed: {}", removed.file_name);
            self.abort_unfinished(&records).await;
            return Err(IngestError::file_set_invalid(reason));
        }

        Ok(records)
    }

    /// Scan, gate, relocate and mark uploaded every record still in `Created`.
    async fn complete(
        &self,
        message: &ExtractedMessage,
        validated: &ValidatedFileSet,
        records: &[DocumentReference],
    ) -> Result<(), IngestError> {
        for ((file, location), record) in message
            .files
            .iter()
            .zip(&validated.locations)
            .zip(records)
        {
            if record.status() == DocumentStatus::Created {
                self.gate.scan_file(record.id, location.key(file)).await?;
            }
        }

        let mut current = Vec::with_capacity(records.len());
        for record in records {
            let id = record.id;
            let latest = self
                .store_call("get document reference", || self.documents.get(id))
                .await?
                .ok_or(LifecycleError::NotFound(id))?;
            current.push(latest);
        }
        ensure_bundle_clean(&current)?;

        for (file, record) in message.files.iter().zip(&current) {
            if record.status() != DocumentStatus::Created {
                continue;
            }
            let id = record.id;
            self.store_call("set uploading", || self.documents.set_uploading(id, true))
                .await?;
            self.relocator
                .relocate(id, &file.staging_key, &file.permanent_key)
                .await?;
            self.store_call("mark uploaded", || self.documents.mark_uploaded(id))
                .await?;
        }
        Ok(())
    }

    async fn update(&self, message: &ExtractedMessage) -> Result<UploadOutcome, IngestError> {
        let live = self.live_documents(&message.nhs_number).await?;
        let pds_ods_code = self.registered_practice(message).await?;
        for record in &live {
            let id = record.id;
            self.store_call("set current gp ods", || {
                self.documents
                    .set_current_gp_ods(id, &message.uploader_ods_code)
            })
            .await?;
        }

        tracing::info!(documents = live.len(), "Practice updated for patient documents");
        Ok(self.outcome(message, pds_ods_code, live.len()))
    }

    async fn delete(&self, message: &ExtractedMessage) -> Result<UploadOutcome, IngestError> {
        let live = self.live_documents(&message.nhs_number).await?;
        for record in &live {
            let id = record.id;
            match record.status() {
                DocumentStatus::Uploaded => {
                    self.store_call("mark deleted", || self.documents.mark_deleted(id))
                        .await?;
                }
                DocumentStatus::Created => {
                    self.store_call("abort document", || self.documents.abort(id))
                        .await?;
                }
                DocumentStatus::Deleted => {}
            }
        }

        tracing::info!(documents = live.len(), "Patient documents deleted");
        Ok(self.outcome(message, message.uploader_ods_code.clone(), live.len()))
    }

    async fn live_documents(&self, nhs_number: &str) -> Result<Vec<DocumentReference>, IngestError> {
        let live: Vec<DocumentReference> = self
            .store_call("find documents", || self.documents.find_by_nhs_number(nhs_number))
            .await?
            .into_iter()
            .filter(DocumentReference::is_live)
            .collect();

        if live.is_empty() {
            return Err(IngestError::file_set_invalid(REASON_NO_DOCUMENTS));
        }
        Ok(live)
    }

    async fn registered_practice(&self, message: &ExtractedMessage) -> Result<String, IngestError> {
        let Some(lookup) = &self.demographics else {
            return Ok(message.uploader_ods_code.clone());
        };
        with_retry(&self.retry, "demographics lookup", PdsError::is_transient, || {
            lookup.registered_practice(&message.nhs_number)
        })
        .await
        .map_err(PdsError::into_ingest)
    }

    /// Best-effort abort of records that did not reach `Uploaded`. Uploaded records
    /// reject the abort and are left as they are.
    async fn abort_unfinished(&self, records: &[DocumentReference]) {
        for record in records {
            let id: Uuid = record.id;
            match self.documents.abort(id).await {
                Ok(_) => tracing::debug!(document_id = %id, "Document aborted"),
                Err(StoreError::Lifecycle(err)) => {
                    tracing::debug!(document_id = %id, error = %err, "Document not aborted")
                }
                Err(err) => {
                    tracing::warn!(document_id = %id, error = %err, "Failed to abort document")
                }
            }
        }
    }

    async fn store_call<T, F, Fut>(&self, operation: &str, op: F) -> Result<T, IngestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        with_retry(&self.retry, operation, StoreError::is_transient, op)
            .await
            .map_err(|e| e.into_ingest(operation))
    }

    fn outcome(&self, message: &ExtractedMessage, pds_ods_code: String, documents: usize) -> UploadOutcome {
        UploadOutcome {
            action: message.action,
            nhs_number: message.nhs_number.clone(),
            uploader_ods_code: message.uploader_ods_code.clone(),
            pds_ods_code,
            file_path: message.file_path.clone(),
            documents,
        }
    }
}
