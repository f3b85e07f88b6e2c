use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use lg_core::models::{BulkUploadReport, UploadStatus};
use sqlx::{FromRow, PgPool, Postgres};
use uuid::Uuid;

use super::error::{StoreError, StoreResult};

/// Append-only log of ingestion outcomes.
#[async_trait]
pub trait UploadReportStore: Send + Sync {
    /// Append a row. Appending the same row id twice keeps a single row.
    async fn append(&self, row: &BulkUploadReport) -> StoreResult<()>;

    /// Rows of one UTC day ordered by (timestamp, id).
    async fn list_by_date(&self, date: NaiveDate) -> StoreResult<Vec<BulkUploadReport>>;
}

#[derive(Debug, FromRow)]
struct BulkUploadReportRow {
    id: Uuid,
    nhs_number: String,
    upload_status: String,
    timestamp: DateTime<Utc>,
    date: NaiveDate,
    file_path: String,
    pds_ods_code: String,
    uploader_ods_code: String,
    failure_reason: Option<String>,
}

impl TryFrom<BulkUploadReportRow> for BulkUploadReport {
    type Error = StoreError;

    fn try_from(row: BulkUploadReportRow) -> Result<Self, Self::Error> {
        let upload_status = row
            .upload_status
            .parse::<UploadStatus>()
            .map_err(|e| StoreError::Corrupt {
                id: row.id.to_string(),
                message: e.to_string(),
            })?;

        Ok(BulkUploadReport {
            id: row.id,
            nhs_number: row.nhs_number,
            upload_status,
            timestamp: row.timestamp,
            date: row.date,
            file_path: row.file_path,
            pds_ods_code: row.pds_ods_code,
            uploader_ods_code: row.uploader_ods_code,
            failure_reason: row.failure_reason,
        })
    }
}

#[derive(Clone)]
pub struct PostgresUploadReportStore {
    pool: PgPool,
}

impl PostgresUploadReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UploadReportStore for PostgresUploadReportStore {
    #[tracing::instrument(
        skip(self, row),
        fields(db.table = "bulk_upload_reports", db.operation = "insert", db.record_id = %row.id)
    )]
    async fn append(&self, row: &BulkUploadReport) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bulk_upload_reports (
                id, nhs_number, upload_status, timestamp, date, file_path,
                pds_ods_code, uploader_ods_code, failure_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(row.id)
        .bind(&row.nhs_number)
        .bind(row.upload_status.to_string())
        .bind(row.timestamp)
        .bind(row.date)
        .bind(&row.file_path)
        .bind(&row.pds_ods_code)
        .bind(&row.uploader_ods_code)
        .bind(&row.failure_reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(
        skip(self),
        fields(db.table = "bulk_upload_reports", db.operation = "select", date = %date)
    )]
    async fn list_by_date(&self, date: NaiveDate) -> StoreResult<Vec<BulkUploadReport>> {
        let rows = sqlx::query_as::<Postgres, BulkUploadReportRow>(
            r#"
            SELECT id, nhs_number, upload_status, timestamp, date, file_path,
                   pds_ods_code, uploader_ods_code, failure_reason
            FROM bulk_upload_reports
            WHERE date = $1
            ORDER BY timestamp, id
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BulkUploadReport::try_from).collect()
    }
}
