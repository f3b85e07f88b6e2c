//! End-to-end ingestion over the in-memory backends.

use async_trait::async_trait;
use lg_core::models::{
    document_id_for, DocumentStatus, QueueRecord, UploadStatus, VirusScanResult,
    SUSPENDED_ODS_CODE,
};
use lg_db::{DocumentReferenceStore, MemoryDocumentStore, MemoryUploadReportStore};
use lg_infra::RetryPolicy;
use lg_services::{DemographicsLookup, PdsError, ScanError, VirusScanner};
use lg_storage::{MemoryStorage, Storage, StorageLayout};
use lg_worker::{BatchProcessor, PipelineSettings, UploadPipeline, REASON_NO_DOCUMENTS};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

const NHS: &str = "9000000009";
const PRACTICE: &str = "A12345";

/// Reports any file whose name contains "infected".
struct NameScanner;

#[async_trait]
impl VirusScanner for NameScanner {
    async fn scan(&self, file_name: &str, _data: Vec<u8>) -> Result<VirusScanResult, ScanError> {
        if file_name.contains("infected") {
            Ok(VirusScanResult::Infected)
        } else {
            Ok(VirusScanResult::Clean)
        }
    }
}

/// Unreachable for the first `outages` scans, clean afterwards.
struct RecoveringScanner {
    outages: AtomicU32,
}

impl RecoveringScanner {
    fn new(outages: u32) -> Self {
        Self {
            outages: AtomicU32::new(outages),
        }
    }
}

#[async_trait]
impl VirusScanner for RecoveringScanner {
    async fn scan(&self, _file_name: &str, _data: Vec<u8>) -> Result<VirusScanResult, ScanError> {
        let remaining = self.outages.load(Ordering::SeqCst);
        if remaining > 0 {
            self.outages.store(remaining - 1, Ordering::SeqCst);
            return Err(ScanError::Unavailable("connection refused".to_string()));
        }
        Ok(VirusScanResult::Clean)
    }
}

/// Registered practice lookup that can be switched to reject every patient.
#[derive(Default)]
struct SwitchablePractice {
    failing: AtomicBool,
}

#[async_trait]
impl DemographicsLookup for SwitchablePractice {
    async fn registered_practice(&self, nhs_number: &str) -> Result<String, PdsError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PdsError::PatientNotFound(nhs_number.to_string()));
        }
        Ok(PRACTICE.to_string())
    }
}

struct FixedPractice(&'static str);

#[async_trait]
impl DemographicsLookup for FixedPractice {
    async fn registered_practice(&self, _nhs_number: &str) -> Result<String, PdsError> {
        Ok(self.0.to_string())
    }
}

struct Harness {
    layout: StorageLayout,
    storage: MemoryStorage,
    documents: MemoryDocumentStore,
    reports: MemoryUploadReportStore,
    processor: BatchProcessor,
}

impl Harness {
    fn new() -> Self {
        Self::with_lookup(None)
    }

    fn with_lookup(demographics: Option<Arc<dyn DemographicsLookup>>) -> Self {
        Self::build(Arc::new(NameScanner), demographics, true)
    }

    fn build(
        scanner: Arc<dyn VirusScanner>,
        demographics: Option<Arc<dyn DemographicsLookup>>,
        clamav_fail_closed: bool,
    ) -> Self {
        let layout = StorageLayout::new("staging", "lloyd-george", "reports");
        let storage = MemoryStorage::new();
        let documents = MemoryDocumentStore::new();
        let reports = MemoryUploadReportStore::new();
        let settings = PipelineSettings {
            clamav_fail_closed,
            retry: RetryPolicy::no_retry(),
            ..PipelineSettings::default()
        };
        let pipeline = UploadPipeline::new(
            layout.clone(),
            Arc::new(storage.clone()),
            Arc::new(documents.clone()),
            Some(scanner),
            demographics,
            settings,
        );
        let processor = BatchProcessor::new(
            Arc::new(pipeline),
            Arc::new(reports.clone()),
            RetryPolicy::no_retry(),
        );
        Harness {
            layout,
            storage,
            documents,
            reports,
            processor,
        }
    }

    async fn stage(&self, path: &str) {
        self.storage
            .upload_with_key(
                &self.layout.staging_key(path),
                b"%PDF-1.4 lloyd george".to_vec(),
                "application/pdf",
            )
            .await
            .unwrap();
    }

    async fn send(&self, bodies: &[String]) -> lg_worker::BatchSummary {
        let records: Vec<QueueRecord> = bodies
            .iter()
            .enumerate()
            .map(|(i, body)| QueueRecord::new(format!("msg-{}", i), body.clone()))
            .collect();
        self.processor.process_batch(&records).await
    }

    fn document_id(&self, path: &str) -> uuid::Uuid {
        document_id_for(NHS, &self.layout.staging_key(path))
    }
}

fn create_message(paths: &[&str]) -> String {
    let files: Vec<String> = paths
        .iter()
        .map(|path| format!(r#"{{"file_path":"{}"}}"#, path))
        .collect();
    format!(
        r#"{{"nhs_number":"{}","gp_practice_code":"{}","scan_date":"2024-01-01","files":[{}]}}"#,
        NHS,
        PRACTICE,
        files.join(",")
    )
}

fn action_message(action: &str, practice: &str) -> String {
    format!(
        r#"{{"nhs_number":"{}","gp_practice_code":"{}","action":"{}"}}"#,
        NHS, practice, action
    )
}

const PART_1: &str = "/9000000009/1of2_Lloyd_George_Record.pdf";
const PART_2: &str = "/9000000009/2of2_Lloyd_George_Record.pdf";

#[tokio::test]
async fn test_complete_clean_file_set_is_uploaded() {
    let h = Harness::new();
    h.stage(PART_1).await;
    h.stage(PART_2).await;

    let summary = h.send(&[create_message(&[PART_1, PART_2])]).await;

    let rows = summary.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].upload_status, UploadStatus::Success);
    assert_eq!(rows[0].nhs_number, NHS);
    assert_eq!(rows[0].pds_ods_code, PRACTICE);

    let docs = h.documents.find_by_nhs_number(NHS).await.unwrap();
    assert_eq!(docs.len(), 2);
    for doc in &docs {
        assert_eq!(doc.status(), DocumentStatus::Uploaded);
        assert_eq!(doc.virus_scanner_result, VirusScanResult::Clean);
        assert_eq!(doc.file_location, h.layout.document_key(NHS, doc.id));
        assert!(!doc.uploading);
        assert!(h.storage.exists(&doc.file_location).await.unwrap());
    }
    assert!(h.storage.keys_with_prefix("staging/").is_empty());
    assert_eq!(h.reports.all().len(), 1);
}

#[tokio::test]
async fn test_incomplete_file_set_fails_without_records() {
    let h = Harness::new();
    h.stage(PART_1).await;

    let summary = h.send(&[create_message(&[PART_1])]).await;

    let rows = summary.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].upload_status, UploadStatus::Failed);
    assert!(rows[0]
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("incomplete file set"));
    assert!(h.documents.find_by_nhs_number(NHS).await.unwrap().is_empty());
    assert_eq!(h.storage.keys_with_prefix("staging/").len(), 1);
}

#[tokio::test]
async fn test_infected_file_fails_the_whole_set() {
    let h = Harness::new();
    let infected = "/9000000009/2of2_infected_Lloyd_George_Record.pdf";
    h.stage(PART_1).await;
    h.stage(infected).await;

    let summary = h.send(&[create_message(&[PART_1, infected])]).await;

    let rows = summary.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].upload_status, UploadStatus::Failed);
    assert_eq!(rows[0].failure_reason.as_deref(), Some("virus detected"));

    let docs = h.documents.find_by_nhs_number(NHS).await.unwrap();
    assert_eq!(docs.len(), 2);
    assert!(docs.iter().all(|doc| doc.uploaded.is_none()));
    assert!(docs.iter().all(|doc| doc.status() == DocumentStatus::Deleted));
    let infected_doc = h.documents.get(h.document_id(infected)).await.unwrap().unwrap();
    assert_eq!(infected_doc.virus_scanner_result, VirusScanResult::Infected);
    assert!(h.storage.keys_with_prefix("lloyd-george/").is_empty());
}

#[tokio::test]
async fn test_malformed_messages_never_cost_other_rows() {
    for bad_position in 0..4 {
        let h = Harness::new();
        let mut bodies: Vec<String> = (1..=3)
            .map(|i| {
                format!(
                    r#"{{"nhs_number":"{}","gp_practice_code":"{}","file_path":"/{}/1of1_missing_{}.pdf"}}"#,
                    NHS, PRACTICE, NHS, i
                )
            })
            .collect();
        bodies.insert(bad_position, "{not json".to_string());

        let summary = h.send(&bodies).await;

        assert_eq!(summary.messages.len(), 4);
        assert_eq!(summary.rows().len(), 3, "bad message at {}", bad_position);
        assert_eq!(summary.dropped(), 1);
        assert_eq!(h.reports.all().len(), 3);
    }
}

#[tokio::test]
async fn test_metadata_failures_still_produce_rows() {
    let h = Harness::new();
    let bodies = vec![
        r#"{"nhs_number":"123","gp_practice_code":"A12345","file_path":"/x/1of1_a.pdf"}"#
            .to_string(),
        r#"{"nhs_number":"9000000009","gp_practice_code":"A12345","action":"archive"}"#
            .to_string(),
    ];

    let summary = h.send(&bodies).await;

    let rows = summary.rows();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.upload_status == UploadStatus::Failed));
    assert_eq!(rows[0].failure_reason.as_deref(), Some("invalid NHS number"));
    assert_eq!(rows[1].uploader_ods_code, PRACTICE);
}

#[tokio::test]
async fn test_redelivered_message_does_not_duplicate_documents() {
    let h = Harness::new();
    h.stage(PART_1).await;
    h.stage(PART_2).await;
    let body = create_message(&[PART_1, PART_2]);

    h.send(&[body.clone()]).await;
    let summary = h.send(&[body]).await;

    assert_eq!(summary.rows()[0].upload_status, UploadStatus::Success);
    let docs = h.documents.find_by_nhs_number(NHS).await.unwrap();
    assert_eq!(docs.len(), 2);
    assert!(docs.iter().all(|doc| doc.status() == DocumentStatus::Uploaded));
    assert_eq!(h.storage.keys_with_prefix("lloyd-george/").len(), 2);
}

#[tokio::test]
async fn test_registration_decides_success_status() {
    let elsewhere = Harness::with_lookup(Some(Arc::new(FixedPractice("B67890"))));
    elsewhere.stage(PART_1).await;
    elsewhere.stage(PART_2).await;
    let summary = elsewhere.send(&[create_message(&[PART_1, PART_2])]).await;
    assert_eq!(summary.rows()[0].upload_status, UploadStatus::RegisteredElsewhere);
    assert_eq!(summary.rows()[0].pds_ods_code, "B67890");

    let suspended = Harness::with_lookup(Some(Arc::new(FixedPractice(SUSPENDED_ODS_CODE))));
    suspended.stage(PART_1).await;
    suspended.stage(PART_2).await;
    let summary = suspended.send(&[create_message(&[PART_1, PART_2])]).await;
    assert_eq!(summary.rows()[0].upload_status, UploadStatus::Suspended);
}

#[tokio::test]
async fn test_update_and_delete_act_on_live_documents() {
    let h = Harness::new();
    h.stage(PART_1).await;
    h.stage(PART_2).await;
    h.send(&[create_message(&[PART_1, PART_2])]).await;

    let summary = h.send(&[action_message("update", "B67890")]).await;
    assert!(summary.rows()[0].upload_status.is_successful());
    let docs = h.documents.find_by_nhs_number(NHS).await.unwrap();
    assert!(docs.iter().all(|doc| doc.current_gp_ods == "B67890"));

    let summary = h.send(&[action_message("delete", PRACTICE)]).await;
    assert_eq!(summary.rows()[0].upload_status, UploadStatus::Success);
    let docs = h.documents.find_by_nhs_number(NHS).await.unwrap();
    assert!(docs.iter().all(|doc| doc.status() == DocumentStatus::Deleted));

    let summary = h.send(&[action_message("delete", PRACTICE)]).await;
    assert_eq!(summary.rows()[0].upload_status, UploadStatus::Failed);
    assert_eq!(summary.rows()[0].failure_reason.as_deref(), Some(REASON_NO_DOCUMENTS));
}

#[tokio::test]
async fn test_update_without_documents_fails() {
    let h = Harness::new();

    let summary = h.send(&[action_message("update", PRACTICE)]).await;

    assert_eq!(summary.rows().len(), 1);
    assert_eq!(summary.rows()[0].failure_reason.as_deref(), Some(REASON_NO_DOCUMENTS));
}

#[tokio::test]
async fn test_event_without_records_produces_nothing() {
    let h = Harness::new();

    assert!(h.processor.process_event("{}").await.messages.is_empty());
    assert!(h.processor.process_event("garbage").await.messages.is_empty());
    assert!(h.reports.all().is_empty());
}

#[tokio::test]
async fn test_event_records_are_processed() {
    let h = Harness::new();
    h.stage(PART_1).await;
    h.stage(PART_2).await;
    let event = serde_json::json!({
        "Records": [
            {"messageId": "m-1", "body": create_message(&[PART_1, PART_2])},
            {"messageId": "m-2"}
        ]
    });

    let summary = h.processor.process_event(&event.to_string()).await;

    assert_eq!(summary.rows().len(), 1);
    assert_eq!(summary.dropped(), 1);
    assert_eq!(summary.messages[0].message_id.as_deref(), Some("m-1"));
}

#[tokio::test]
async fn test_scanner_outage_is_resumed_on_redelivery() {
    let h = Harness::build(Arc::new(RecoveringScanner::new(1)), None, false);
    h.stage(PART_1).await;
    h.stage(PART_2).await;
    let body = create_message(&[PART_1, PART_2]);

    let first = h.send(&[body.clone()]).await;
    assert_eq!(first.rows()[0].upload_status, UploadStatus::Failed);
    assert_eq!(
        first.rows()[0].failure_reason.as_deref(),
        Some("infrastructure failure during virus scan")
    );
    let docs = h.documents.find_by_nhs_number(NHS).await.unwrap();
    assert!(docs.iter().all(|doc| doc.status() == DocumentStatus::Created));

    let redelivered = h.send(&[body]).await;
    assert_eq!(redelivered.rows()[0].upload_status, UploadStatus::Success);
    let docs = h.documents.find_by_nhs_number(NHS).await.unwrap();
    assert_eq!(docs.len(), 2);
    assert!(docs.iter().all(|doc| doc.status() == DocumentStatus::Uploaded));
    assert!(h.storage.keys_with_prefix("staging/").is_empty());
}

#[tokio::test]
async fn test_rejected_set_cannot_be_resubmitted() {
    let h = Harness::new();
    let infected = "/9000000009/2of2_infected_Lloyd_George_Record.pdf";
    h.stage(PART_1).await;
    h.stage(infected).await;
    let body = create_message(&[PART_1, infected]);

    h.send(&[body.clone()]).await;
    let summary = h.send(&[body]).await;

    assert_eq!(summary.rows()[0].upload_status, UploadStatus::Failed);
    assert!(summary.rows()[0]
        .failure_reason
        .as_deref()
        .unwrap()
        .starts_with("document previously removed"));
}

#[tokio::test]
async fn test_single_file_parts_in_one_batch_form_a_set() {
    let h = Harness::new();
    h.stage(PART_1).await;
    h.stage(PART_2).await;
    let part = |path: &str| {
        format!(
            r#"{{"nhs_number":"{}","gp_practice_code":"{}","scan_date":"2024-01-01","file_path":"{}"}}"#,
            NHS, PRACTICE, path
        )
    };
    let other_patient = r#"{"nhs_number":"9000000017","gp_practice_code":"A12345","file_path":"/9000000017/1of1_missing.pdf"}"#;

    let summary = h
        .send(&[part(PART_1), other_patient.to_string(), part(PART_2)])
        .await;

    let rows = summary.rows();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].upload_status, UploadStatus::Success);
    assert_eq!(rows[0].file_path, PART_1);
    assert_eq!(rows[1].upload_status, UploadStatus::Failed);
    assert_eq!(rows[2].upload_status, UploadStatus::Success);
    assert_eq!(rows[2].file_path, PART_2);
    assert_eq!(summary.messages[2].message_id.as_deref(), Some("msg-2"));

    let docs = h.documents.find_by_nhs_number(NHS).await.unwrap();
    assert_eq!(docs.len(), 2);
    assert!(docs.iter().all(|doc| doc.status() == DocumentStatus::Uploaded));
}

#[tokio::test]
async fn test_single_file_part_alone_is_incomplete() {
    let h = Harness::new();
    h.stage(PART_1).await;
    let body = format!(
        r#"{{"nhs_number":"{}","gp_practice_code":"{}","file_path":"{}"}}"#,
        NHS, PRACTICE, PART_1
    );

    let summary = h.send(&[body]).await;

    assert!(summary.rows()[0]
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("incomplete file set"));
}

#[tokio::test]
async fn test_failed_lookup_leaves_practice_unchanged_on_update() {
    let lookup = Arc::new(SwitchablePractice::default());
    let h = Harness::with_lookup(Some(lookup.clone()));
    h.stage(PART_1).await;
    h.stage(PART_2).await;
    h.send(&[create_message(&[PART_1, PART_2])]).await;

    lookup.failing.store(true, Ordering::SeqCst);
    let summary = h.send(&[action_message("update", "B67890")]).await;

    assert_eq!(summary.rows()[0].upload_status, UploadStatus::Failed);
    let docs = h.documents.find_by_nhs_number(NHS).await.unwrap();
    assert!(docs.iter().all(|doc| doc.current_gp_ods == PRACTICE));
}
