//! In-memory store implementations.
//!
//! State lives behind a `Mutex`, so every call is atomic for its id. Nothing is shared
//! between two store instances.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use lg_core::models::{BulkUploadReport, DocumentReference, DocumentZipTrace};
use lg_core::LifecycleError;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::document_reference::{DocumentReferenceStore, Transition};
use super::error::{StoreError, StoreResult};
use super::upload_report::UploadReportStore;
use super::zip_trace::ZipTraceStore;

fn lock<T>(mutex: &Mutex<T>) -> StoreResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
}

#[derive(Default)]
struct DocumentState {
    records: HashMap<Uuid, DocumentReference>,
    by_nhs_number: HashMap<String, BTreeSet<Uuid>>,
}

#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    state: Arc<Mutex<DocumentState>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentReferenceStore for MemoryDocumentStore {
    async fn create(&self, record: &DocumentReference) -> StoreResult<DocumentReference> {
        let mut state = lock(&self.state)?;
        if let Some(existing) = state.records.get(&record.id) {
            if existing.same_payload(record) {
                return Ok(existing.clone());
            }
            return Err(LifecycleError::DuplicateId(record.id).into());
        }

        state
            .by_nhs_number
            .entry(record.nhs_number.clone())
            .or_default()
            .insert(record.id);
        state.records.insert(record.id, record.clone());
        Ok(record.clone())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<DocumentReference>> {
        Ok(lock(&self.state)?.records.get(&id).cloned())
    }

    async fn find_by_nhs_number(&self, nhs_number: &str) -> StoreResult<Vec<DocumentReference>> {
        let state = lock(&self.state)?;
        let mut records: Vec<DocumentReference> = state
            .by_nhs_number
            .get(nhs_number)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.records.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn transition(&self, id: Uuid, transition: Transition) -> StoreResult<DocumentReference> {
        let mut state = lock(&self.state)?;
        let record = state
            .records
            .get_mut(&id)
            .ok_or(LifecycleError::NotFound(id))?;

        // Work on a copy so a rejected transition leaves the stored record untouched.
        let mut updated = record.clone();
        transition.apply(&mut updated, Utc::now())?;
        *record = updated.clone();
        Ok(updated)
    }
}

#[derive(Clone, Default)]
pub struct MemoryUploadReportStore {
    rows: Arc<Mutex<Vec<BulkUploadReport>>>,
}

impl MemoryUploadReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row appended so far, in append order.
    pub fn all(&self) -> Vec<BulkUploadReport> {
        self.rows.lock().map(|rows| rows.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl UploadReportStore for MemoryUploadReportStore {
    async fn append(&self, row: &BulkUploadReport) -> StoreResult<()> {
        let mut rows = lock(&self.rows)?;
        if !rows.iter().any(|existing| existing.id == row.id) {
            rows.push(row.clone());
        }
        Ok(())
    }

    async fn list_by_date(&self, date: NaiveDate) -> StoreResult<Vec<BulkUploadReport>> {
        let mut rows: Vec<BulkUploadReport> = lock(&self.rows)?
            .iter()
            .filter(|row| row.date == date)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(rows)
    }
}

#[derive(Clone, Default)]
pub struct MemoryZipTraceStore {
    traces: Arc<Mutex<Vec<DocumentZipTrace>>>,
}

impl MemoryZipTraceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ZipTraceStore for MemoryZipTraceStore {
    async fn record(&self, trace: &DocumentZipTrace) -> StoreResult<()> {
        lock(&self.traces)?.push(trace.clone());
        Ok(())
    }

    async fn list_active(&self, now: DateTime<Utc>) -> StoreResult<Vec<DocumentZipTrace>> {
        Ok(lock(&self.traces)?
            .iter()
            .filter(|trace| !trace.is_expired(now))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use lg_core::models::{document_id_for, DocumentStatus, UploadStatus, VirusScanResult};

    fn record(nhs_number: &str, key: &str) -> DocumentReference {
        DocumentReference::new(
            document_id_for(nhs_number, key),
            nhs_number,
            "application/pdf",
            key.rsplit('/').next().unwrap_or(key),
            key,
            "A12345",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_create_twice_with_identical_payload_is_no_op() {
        let store = MemoryDocumentStore::new();
        let doc = record("9000000009", "staging/9000000009/1of1_a.pdf");

        store.create(&doc).await.unwrap();
        store
            .set_virus_scan_result(doc.id, VirusScanResult::Clean)
            .await
            .unwrap();

        let mut again = doc.clone();
        again.created = Utc::now() + Duration::seconds(30);
        let stored = store.create(&again).await.unwrap();

        assert_eq!(stored.virus_scanner_result, VirusScanResult::Clean);
        assert_eq!(stored.created, doc.created);
        assert_eq!(store.find_by_nhs_number("9000000009").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_with_different_payload_is_duplicate() {
        let store = MemoryDocumentStore::new();
        let doc = record("9000000009", "staging/9000000009/1of1_a.pdf");
        store.create(&doc).await.unwrap();

        let mut other = doc.clone();
        other.current_gp_ods = "B67890".to_string();
        let err = store.create(&other).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Lifecycle(LifecycleError::DuplicateId(id)) if id == doc.id
        ));
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let store = MemoryDocumentStore::new();
        let doc = record("9000000009", "staging/9000000009/1of1_a.pdf");
        store.create(&doc).await.unwrap();

        store
            .set_virus_scan_result(doc.id, VirusScanResult::Clean)
            .await
            .unwrap();
        store.set_uploading(doc.id, true).await.unwrap();
        store
            .update_location(doc.id, "lloyd-george/9000000009/doc")
            .await
            .unwrap();
        let uploaded = store.mark_uploaded(doc.id).await.unwrap();
        assert_eq!(uploaded.status(), DocumentStatus::Uploaded);
        assert!(!uploaded.uploading);

        let deleted = store.mark_deleted(doc.id).await.unwrap();
        assert_eq!(deleted.status(), DocumentStatus::Deleted);
        assert!(deleted.created <= deleted.uploaded.unwrap());
        assert!(deleted.uploaded.unwrap() <= deleted.deleted.unwrap());

        let err = store.mark_uploaded(doc.id).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Lifecycle(LifecycleError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejected_transition_leaves_record_unchanged() {
        let store = MemoryDocumentStore::new();
        let doc = record("9000000009", "staging/9000000009/1of1_a.pdf");
        store.create(&doc).await.unwrap();

        assert!(store.mark_uploaded(doc.id).await.is_err());
        let stored = store.get(doc.id).await.unwrap().unwrap();
        assert_eq!(stored, doc);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let store = MemoryDocumentStore::new();
        let err = store.abort(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Lifecycle(LifecycleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_find_by_nhs_number_uses_index() {
        let store = MemoryDocumentStore::new();
        store
            .create(&record("9000000009", "staging/9000000009/1of2_a.pdf"))
            .await
            .unwrap();
        store
            .create(&record("9000000009", "staging/9000000009/2of2_a.pdf"))
            .await
            .unwrap();
        store
            .create(&record("9000000017", "staging/9000000017/1of1_a.pdf"))
            .await
            .unwrap();

        assert_eq!(store.find_by_nhs_number("9000000009").await.unwrap().len(), 2);
        assert!(store.find_by_nhs_number("9999999999").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_report_rows_listed_by_date_in_order() {
        let store = MemoryUploadReportStore::new();
        let day = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let late = BulkUploadReport::failed("9000000009", "/b", "A12345", "scan failed", day);
        let early = BulkUploadReport::success(
            "9000000017",
            "/a",
            "A12345",
            "A12345",
            day - Duration::hours(1),
        );
        let next_day = BulkUploadReport::success(
            "9000000025",
            "/c",
            "A12345",
            "A12345",
            day + Duration::days(1),
        );

        store.append(&late).await.unwrap();
        store.append(&early).await.unwrap();
        store.append(&next_day).await.unwrap();
        store.append(&late).await.unwrap();

        let rows = store.list_by_date(day.date_naive()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].upload_status, UploadStatus::Success);
        assert_eq!(rows[1].id, late.id);
        assert_eq!(store.all().len(), 3);
    }

    #[tokio::test]
    async fn test_zip_traces_expire() {
        let store = MemoryZipTraceStore::new();
        let now = Utc::now();
        store
            .record(&DocumentZipTrace::new("zips/a.zip", now))
            .await
            .unwrap();

        assert_eq!(store.list_active(now).await.unwrap().len(), 1);
        assert!(store
            .list_active(now + Duration::hours(25))
            .await
            .unwrap()
            .is_empty());
    }
}
