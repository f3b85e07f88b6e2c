//! Database setup and initialization

use anyhow::{Context, Result};
use lg_core::Config;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::document_reference::{DocumentReferenceStore, PostgresDocumentStore};
use super::memory::{MemoryDocumentStore, MemoryUploadReportStore, MemoryZipTraceStore};
use super::upload_report::{PostgresUploadReportStore, UploadReportStore};
use super::zip_trace::{PostgresZipTraceStore, ZipTraceStore};

/// Setup database connection pool and run migrations
pub async fn setup_database(config: &Config, database_url: &str) -> Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections())
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds()))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.db_max_connections(),
        "Database connected successfully"
    );

    // Run pending migrations on startup (path: workspace migrations/ from crate root)
    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .context("Failed to load migrations")?;
    migrator
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

/// The stores one process works with.
#[derive(Clone)]
pub struct Stores {
    pub documents: Arc<dyn DocumentReferenceStore>,
    pub reports: Arc<dyn UploadReportStore>,
    pub zip_traces: Arc<dyn ZipTraceStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Stores {
            documents: Arc::new(MemoryDocumentStore::new()),
            reports: Arc::new(MemoryUploadReportStore::new()),
            zip_traces: Arc::new(MemoryZipTraceStore::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Stores {
            documents: Arc::new(PostgresDocumentStore::new(pool.clone())),
            reports: Arc::new(PostgresUploadReportStore::new(pool.clone())),
            zip_traces: Arc::new(PostgresZipTraceStore::new(pool)),
        }
    }
}

/// Create stores based on configuration: PostgreSQL when `DATABASE_URL` is set,
/// in-memory otherwise.
pub async fn create_stores(config: &Config) -> Result<Stores> {
    match config.database_url() {
        Some(url) => {
            tracing::info!("Initializing PostgreSQL stores");
            let pool = setup_database(config, url).await?;
            Ok(Stores::postgres(pool))
        }
        None => {
            if config.is_production() {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must be set in production; in-memory stores lose all state on exit"
                ));
            }
            tracing::warn!("DATABASE_URL not set, using in-memory stores");
            Ok(Stores::in_memory())
        }
    }
}
