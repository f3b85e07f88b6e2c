use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lg_core::models::{DocumentReference, VirusScanResult};
use lg_core::{mask_nhs_number, LifecycleError};
use sqlx::{FromRow, PgPool, Postgres};
use uuid::Uuid;

use super::error::{StoreError, StoreResult};

/// A lifecycle mutation of one document reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    MarkUploaded,
    MarkDeleted,
    Abort,
    SetVirusScanResult(VirusScanResult),
    UpdateLocation(String),
    SetUploading(bool),
    SetCurrentGpOds(String),
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::MarkUploaded => "mark_uploaded",
            Transition::MarkDeleted => "mark_deleted",
            Transition::Abort => "abort",
            Transition::SetVirusScanResult(_) => "set_virus_scan_result",
            Transition::UpdateLocation(_) => "update_location",
            Transition::SetUploading(_) => "set_uploading",
            Transition::SetCurrentGpOds(_) => "set_current_gp_ods",
        }
    }

    /// Apply the transition to a record. Returns whether the record changed.
    pub fn apply(
        &self,
        record: &mut DocumentReference,
        now: DateTime<Utc>,
    ) -> Result<bool, LifecycleError> {
        match self {
            Transition::MarkUploaded => record.mark_uploaded(now),
            Transition::MarkDeleted => record.mark_deleted(now),
            Transition::Abort => record.abort(now),
            Transition::SetVirusScanResult(verdict) => record.set_virus_scan_result(*verdict, now),
            Transition::UpdateLocation(location) => record.update_location(location, now),
            Transition::SetUploading(flag) => record.set_uploading(*flag, now),
            Transition::SetCurrentGpOds(ods) => record.set_current_gp_ods(ods, now),
        }
    }
}

/// Durable state machine and index for document reference records.
#[async_trait]
pub trait DocumentReferenceStore: Send + Sync {
    /// Insert a new record. Creating an id that already exists succeeds only when the
    /// payload is identical, and returns the stored record unchanged.
    async fn create(&self, record: &DocumentReference) -> StoreResult<DocumentReference>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<DocumentReference>>;

    async fn find_by_nhs_number(&self, nhs_number: &str) -> StoreResult<Vec<DocumentReference>>;

    /// Apply a transition atomically for one id and return the resulting record.
    async fn transition(&self, id: Uuid, transition: Transition) -> StoreResult<DocumentReference>;

    async fn mark_uploaded(&self, id: Uuid) -> StoreResult<DocumentReference> {
        self.transition(id, Transition::MarkUploaded).await
    }

    async fn mark_deleted(&self, id: Uuid) -> StoreResult<DocumentReference> {
        self.transition(id, Transition::MarkDeleted).await
    }

    async fn abort(&self, id: Uuid) -> StoreResult<DocumentReference> {
        self.transition(id, Transition::Abort).await
    }

    async fn set_virus_scan_result(
        &self,
        id: Uuid,
        verdict: VirusScanResult,
    ) -> StoreResult<DocumentReference> {
        self.transition(id, Transition::SetVirusScanResult(verdict))
            .await
    }

    async fn update_location(&self, id: Uuid, location: &str) -> StoreResult<DocumentReference> {
        self.transition(id, Transition::UpdateLocation(location.to_string()))
            .await
    }

    async fn set_uploading(&self, id: Uuid, flag: bool) -> StoreResult<DocumentReference> {
        self.transition(id, Transition::SetUploading(flag)).await
    }

    async fn set_current_gp_ods(&self, id: Uuid, ods_code: &str) -> StoreResult<DocumentReference> {
        self.transition(id, Transition::SetCurrentGpOds(ods_code.to_string()))
            .await
    }
}

const SELECT_COLUMNS: &str = "id, nhs_number, content_type, file_name, file_location, created, \
     uploaded, deleted, virus_scanner_result, current_gp_ods, last_updated, doc_type, uploading, ttl";

#[derive(Debug, FromRow)]
struct DocumentReferenceRow {
    id: Uuid,
    nhs_number: String,
    content_type: String,
    file_name: String,
    file_location: String,
    created: DateTime<Utc>,
    uploaded: Option<DateTime<Utc>>,
    deleted: Option<DateTime<Utc>>,
    virus_scanner_result: String,
    current_gp_ods: String,
    last_updated: DateTime<Utc>,
    doc_type: String,
    uploading: bool,
    ttl: Option<i64>,
}

impl TryFrom<DocumentReferenceRow> for DocumentReference {
    type Error = StoreError;

    fn try_from(row: DocumentReferenceRow) -> Result<Self, Self::Error> {
        let virus_scanner_result = row
            .virus_scanner_result
            .parse::<VirusScanResult>()
            .map_err(|e| StoreError::Corrupt {
                id: row.id.to_string(),
                message: e.to_string(),
            })?;

        Ok(DocumentReference {
            id: row.id,
            nhs_number: row.nhs_number,
            content_type: row.content_type,
            file_name: row.file_name,
            file_location: row.file_location,
            created: row.created,
            uploaded: row.uploaded,
            deleted: row.deleted,
            virus_scanner_result,
            current_gp_ods: row.current_gp_ods,
            last_updated: row.last_updated,
            doc_type: row.doc_type,
            uploading: row.uploading,
            ttl: row.ttl,
        })
    }
}

#[derive(Clone)]
pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentReferenceStore for PostgresDocumentStore {
    #[tracing::instrument(
        skip(self, record),
        fields(db.table = "document_references", db.operation = "insert", db.record_id = %record.id)
    )]
    async fn create(&self, record: &DocumentReference) -> StoreResult<DocumentReference> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO document_references (
                id, nhs_number, content_type, file_name, file_location, created, uploaded,
                deleted, virus_scanner_result, current_gp_ods, last_updated, doc_type, uploading, ttl
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(&record.nhs_number)
        .bind(&record.content_type)
        .bind(&record.file_name)
        .bind(&record.file_location)
        .bind(record.created)
        .bind(record.uploaded)
        .bind(record.deleted)
        .bind(record.virus_scanner_result.to_string())
        .bind(&record.current_gp_ods)
        .bind(record.last_updated)
        .bind(&record.doc_type)
        .bind(record.uploading)
        .bind(record.ttl)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            tracing::debug!(
                nhs_number = %mask_nhs_number(&record.nhs_number),
                "Document reference created"
            );
            return Ok(record.clone());
        }

        let existing = self
            .get(record.id)
            .await?
            .ok_or(LifecycleError::NotFound(record.id))?;
        if existing.same_payload(record) {
            Ok(existing)
        } else {
            Err(LifecycleError::DuplicateId(record.id).into())
        }
    }

    #[tracing::instrument(
        skip(self),
        fields(db.table = "document_references", db.operation = "select", db.record_id = %id)
    )]
    async fn get(&self, id: Uuid) -> StoreResult<Option<DocumentReference>> {
        let query = format!("SELECT {} FROM document_references WHERE id = $1", SELECT_COLUMNS);
        let row = sqlx::query_as::<Postgres, DocumentReferenceRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(DocumentReference::try_from).transpose()
    }

    #[tracing::instrument(
        skip(self, nhs_number),
        fields(db.table = "document_references", db.operation = "select")
    )]
    async fn find_by_nhs_number(&self, nhs_number: &str) -> StoreResult<Vec<DocumentReference>> {
        let query = format!(
            "SELECT {} FROM document_references WHERE nhs_number = $1 ORDER BY created, id",
            SELECT_COLUMNS
        );
        let rows = sqlx::query_as::<Postgres, DocumentReferenceRow>(&query)
            .bind(nhs_number)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(DocumentReference::try_from).collect()
    }

    #[tracing::instrument(
        skip(self, transition),
        fields(
            db.table = "document_references",
            db.operation = "update",
            db.record_id = %id,
            transition = transition.name()
        )
    )]
    async fn transition(&self, id: Uuid, transition: Transition) -> StoreResult<DocumentReference> {
        let mut tx = self.pool.begin().await?;

        let query = format!(
            "SELECT {} FROM document_references WHERE id = $1 FOR UPDATE",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<Postgres, DocumentReferenceRow>(&query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(LifecycleError::NotFound(id))?;
        let mut record = DocumentReference::try_from(row)?;

        let changed = transition.apply(&mut record, Utc::now())?;
        if !changed {
            tx.rollback().await?;
            return Ok(record);
        }

        sqlx::query(
            r#"
            UPDATE document_references
            SET file_location = $2,
                uploaded = $3,
                deleted = $4,
                virus_scanner_result = $5,
                current_gp_ods = $6,
                last_updated = $7,
                uploading = $8
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(&record.file_location)
        .bind(record.uploaded)
        .bind(record.deleted)
        .bind(record.virus_scanner_result.to_string())
        .bind(&record.current_gp_ods)
        .bind(record.last_updated)
        .bind(record.uploading)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(status = %record.status(), "Document reference updated");

        Ok(record)
    }
}
