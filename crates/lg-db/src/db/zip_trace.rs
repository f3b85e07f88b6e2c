use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lg_core::models::DocumentZipTrace;
use sqlx::{FromRow, PgPool, Postgres};
use uuid::Uuid;

use super::error::StoreResult;

/// Transient records of generated download bundles.
#[async_trait]
pub trait ZipTraceStore: Send + Sync {
    async fn record(&self, trace: &DocumentZipTrace) -> StoreResult<()>;

    /// Traces whose TTL has not passed at `now`.
    async fn list_active(&self, now: DateTime<Utc>) -> StoreResult<Vec<DocumentZipTrace>>;
}

#[derive(Debug, FromRow)]
struct ZipTraceRow {
    id: Uuid,
    created: DateTime<Utc>,
    file_location: String,
    ttl: i64,
}

impl From<ZipTraceRow> for DocumentZipTrace {
    fn from(row: ZipTraceRow) -> Self {
        DocumentZipTrace {
            id: row.id,
            created: row.created,
            file_location: row.file_location,
            ttl: row.ttl,
        }
    }
}

#[derive(Clone)]
pub struct PostgresZipTraceStore {
    pool: PgPool,
}

impl PostgresZipTraceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ZipTraceStore for PostgresZipTraceStore {
    #[tracing::instrument(
        skip(self, trace),
        fields(db.table = "document_zip_traces", db.operation = "insert", db.record_id = %trace.id)
    )]
    async fn record(&self, trace: &DocumentZipTrace) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO document_zip_traces (id, created, file_location, ttl) VALUES ($1, $2, $3, $4)",
        )
        .bind(trace.id)
        .bind(trace.created)
        .bind(&trace.file_location)
        .bind(trace.ttl)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "document_zip_traces", db.operation = "select"))]
    async fn list_active(&self, now: DateTime<Utc>) -> StoreResult<Vec<DocumentZipTrace>> {
        let rows = sqlx::query_as::<Postgres, ZipTraceRow>(
            "SELECT id, created, file_location, ttl FROM document_zip_traces WHERE ttl > $1 ORDER BY created, id",
        )
        .bind(now.timestamp())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DocumentZipTrace::from).collect())
    }
}
