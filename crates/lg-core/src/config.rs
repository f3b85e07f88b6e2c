//! Configuration module
//!
//! This module provides configuration structures for the ingestion worker and the
//! reporting job, including database, storage, virus scanning, retry and queue settings.

use std::env;

use crate::storage_types::StorageBackend;

// Common constants
const MAX_CONNECTIONS: u32 = 10;
const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Base configuration shared by every binary
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub environment: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub log_json: bool,
}

/// Ingestion and reporting configuration
#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub base: BaseConfig,
    /// When unset, lifecycle and report stores are kept in memory.
    pub database_url: Option<String>,
    // Storage configuration
    pub storage_backend: StorageBackend,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // Custom endpoint for S3-compatible providers (MinIO, LocalStack, etc.)
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    pub staging_prefix: String,
    pub document_prefix: String,
    pub report_prefix: String,
    // File-set validation
    pub min_file_set_bytes: u64,
    pub max_file_set_bytes: u64,
    pub allowed_content_types: Vec<String>,
    // ClamAV configuration
    pub clamav_enabled: bool,
    pub clamav_host: String,
    pub clamav_port: u16,
    /// Record a `Failed` verdict when the scanner is unreachable instead of retrying.
    pub clamav_fail_closed: bool,
    pub clamav_timeout_secs: u64,
    // Collaborator retry policy
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    // Queue consumer
    pub sqs_queue_url: Option<String>,
    pub sqs_batch_size: i32,
    pub sqs_wait_time_secs: i32,
    // Patient demographics service
    pub pds_base_url: Option<String>,
    pub pds_timeout_secs: u64,
    // Reporting
    pub report_ods_codes: Vec<String>,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<IngestConfig>);

impl Config {
    fn as_ingest(&self) -> &IngestConfig {
        &self.0
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let environment = self.as_ingest().base.environment.to_lowercase();
        environment == "production" || environment == "prod"
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = IngestConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    /// Build configuration from an arbitrary key lookup instead of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = IngestConfig::from_lookup(lookup)?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.as_ingest().validate()
    }

    // Convenience getters for common fields
    pub fn environment(&self) -> &str {
        &self.as_ingest().base.environment
    }

    pub fn db_max_connections(&self) -> u32 {
        self.as_ingest().base.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.as_ingest().base.db_timeout_seconds
    }

    pub fn log_json(&self) -> bool {
        self.as_ingest().base.log_json
    }

    pub fn database_url(&self) -> Option<&str> {
        self.as_ingest().database_url.as_deref()
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.as_ingest().storage_backend
    }

    pub fn s3_bucket(&self) -> Option<&str> {
        self.as_ingest().s3_bucket.as_deref()
    }

    pub fn s3_region(&self) -> Option<&str> {
        self.as_ingest().s3_region.as_deref()
    }

    pub fn s3_endpoint(&self) -> Option<&str> {
        self.as_ingest().s3_endpoint.as_deref()
    }

    pub fn local_storage_path(&self) -> Option<&str> {
        self.as_ingest().local_storage_path.as_deref()
    }

    pub fn local_storage_base_url(&self) -> Option<&str> {
        self.as_ingest().local_storage_base_url.as_deref()
    }

    pub fn staging_prefix(&self) -> &str {
        &self.as_ingest().staging_prefix
    }

    pub fn document_prefix(&self) -> &str {
        &self.as_ingest().document_prefix
    }

    pub fn report_prefix(&self) -> &str {
        &self.as_ingest().report_prefix
    }

    pub fn min_file_set_bytes(&self) -> u64 {
        self.as_ingest().min_file_set_bytes
    }

    pub fn max_file_set_bytes(&self) -> u64 {
        self.as_ingest().max_file_set_bytes
    }

    pub fn allowed_content_types(&self) -> &[String] {
        &self.as_ingest().allowed_content_types
    }

    pub fn clamav_enabled(&self) -> bool {
        self.as_ingest().clamav_enabled
    }

    pub fn clamav_host(&self) -> &str {
        &self.as_ingest().clamav_host
    }

    pub fn clamav_port(&self) -> u16 {
        self.as_ingest().clamav_port
    }

    pub fn clamav_fail_closed(&self) -> bool {
        self.as_ingest().clamav_fail_closed
    }

    pub fn clamav_timeout_secs(&self) -> u64 {
        self.as_ingest().clamav_timeout_secs
    }

    pub fn retry_max_attempts(&self) -> u32 {
        self.as_ingest().retry_max_attempts
    }

    pub fn retry_base_delay_ms(&self) -> u64 {
        self.as_ingest().retry_base_delay_ms
    }

    pub fn retry_max_delay_ms(&self) -> u64 {
        self.as_ingest().retry_max_delay_ms
    }

    pub fn sqs_queue_url(&self) -> Option<&str> {
        self.as_ingest().sqs_queue_url.as_deref()
    }

    pub fn sqs_batch_size(&self) -> i32 {
        self.as_ingest().sqs_batch_size
    }

    pub fn sqs_wait_time_secs(&self) -> i32 {
        self.as_ingest().sqs_wait_time_secs
    }

    pub fn pds_base_url(&self) -> Option<&str> {
        self.as_ingest().pds_base_url.as_deref()
    }

    pub fn pds_timeout_secs(&self) -> u64 {
        self.as_ingest().pds_timeout_secs
    }

    pub fn report_ods_codes(&self) -> &[String] {
        &self.as_ingest().report_ods_codes
    }
}

fn split_list(raw: &str, lowercase: bool) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            if lowercase {
                s.to_lowercase()
            } else {
                s.to_string()
            }
        })
        .collect()
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        const MIN_FILE_SET_BYTES: u64 = 1;
        const MAX_FILE_SET_SIZE_MB: u64 = 1024;
        const CLAMAV_TIMEOUT_SECS: u64 = 60;
        const RETRY_MAX_ATTEMPTS: u32 = 3;
        const RETRY_BASE_DELAY_MS: u64 = 200;
        const RETRY_MAX_DELAY_MS: u64 = 5_000;
        const SQS_BATCH_SIZE: i32 = 10;
        const SQS_WAIT_TIME_SECS: i32 = 20;
        const PDS_TIMEOUT_SECS: u64 = 10;

        let environment = lookup("ENVIRONMENT")
            .or_else(|| lookup("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let base = BaseConfig {
            environment,
            db_max_connections: lookup("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|| MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: lookup("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|| CONNECTION_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
            log_json: lookup("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        };

        let storage_backend = match lookup("STORAGE_BACKEND") {
            Some(raw) => raw.parse::<StorageBackend>()?,
            None => StorageBackend::S3,
        };

        let max_file_set_size_mb = lookup("MAX_FILE_SET_SIZE_MB")
            .unwrap_or_else(|| MAX_FILE_SET_SIZE_MB.to_string())
            .parse::<u64>()
            .unwrap_or(MAX_FILE_SET_SIZE_MB);

        Ok(IngestConfig {
            base,
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            storage_backend,
            s3_bucket: lookup("S3_BUCKET"),
            s3_region: lookup("S3_REGION").or_else(|| lookup("AWS_REGION")),
            s3_endpoint: lookup("S3_ENDPOINT"),
            local_storage_path: lookup("LOCAL_STORAGE_PATH"),
            local_storage_base_url: lookup("LOCAL_STORAGE_BASE_URL"),
            staging_prefix: lookup("STAGING_PREFIX").unwrap_or_else(|| "staging".to_string()),
            document_prefix: lookup("DOCUMENT_PREFIX")
                .unwrap_or_else(|| "lloyd-george".to_string()),
            report_prefix: lookup("REPORT_PREFIX").unwrap_or_else(|| "reports".to_string()),
            min_file_set_bytes: lookup("MIN_FILE_SET_BYTES")
                .unwrap_or_else(|| MIN_FILE_SET_BYTES.to_string())
                .parse()
                .unwrap_or(MIN_FILE_SET_BYTES),
            max_file_set_bytes: max_file_set_size_mb * 1024 * 1024,
            allowed_content_types: split_list(
                &lookup("ALLOWED_CONTENT_TYPES")
                    .unwrap_or_else(|| "application/pdf".to_string()),
                true,
            ),
            clamav_enabled: lookup("CLAMAV_ENABLED")
                .unwrap_or_else(|| "true".to_string())
                .parse()
                .unwrap_or(true),
            clamav_host: lookup("CLAMAV_HOST").unwrap_or_else(|| "localhost".to_string()),
            clamav_port: lookup("CLAMAV_PORT")
                .unwrap_or_else(|| "3310".to_string())
                .parse()
                .unwrap_or(3310),
            clamav_fail_closed: lookup("CLAMAV_FAIL_CLOSED")
                .unwrap_or_else(|| "true".to_string())
                .parse()
                .unwrap_or(true),
            clamav_timeout_secs: lookup("CLAMAV_TIMEOUT_SECS")
                .unwrap_or_else(|| CLAMAV_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CLAMAV_TIMEOUT_SECS),
            retry_max_attempts: lookup("RETRY_MAX_ATTEMPTS")
                .unwrap_or_else(|| RETRY_MAX_ATTEMPTS.to_string())
                .parse()
                .unwrap_or(RETRY_MAX_ATTEMPTS),
            retry_base_delay_ms: lookup("RETRY_BASE_DELAY_MS")
                .unwrap_or_else(|| RETRY_BASE_DELAY_MS.to_string())
                .parse()
                .unwrap_or(RETRY_BASE_DELAY_MS),
            retry_max_delay_ms: lookup("RETRY_MAX_DELAY_MS")
                .unwrap_or_else(|| RETRY_MAX_DELAY_MS.to_string())
                .parse()
                .unwrap_or(RETRY_MAX_DELAY_MS),
            sqs_queue_url: lookup("SQS_QUEUE_URL"),
            sqs_batch_size: lookup("SQS_BATCH_SIZE")
                .unwrap_or_else(|| SQS_BATCH_SIZE.to_string())
                .parse()
                .unwrap_or(SQS_BATCH_SIZE),
            sqs_wait_time_secs: lookup("SQS_WAIT_TIME_SECS")
                .unwrap_or_else(|| SQS_WAIT_TIME_SECS.to_string())
                .parse()
                .unwrap_or(SQS_WAIT_TIME_SECS),
            pds_base_url: lookup("PDS_BASE_URL").filter(|v| !v.trim().is_empty()),
            pds_timeout_secs: lookup("PDS_TIMEOUT_SECS")
                .unwrap_or_else(|| PDS_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(PDS_TIMEOUT_SECS),
            report_ods_codes: split_list(&lookup("REPORT_ODS_CODES").unwrap_or_default(), false)
                .into_iter()
                .map(|code| code.to_uppercase())
                .collect(),
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must be a valid PostgreSQL connection string"
                ));
            }
        }

        // Validate storage backend configuration
        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
            }
            StorageBackend::Memory => {
                if self.base.environment.eq_ignore_ascii_case("production") {
                    return Err(anyhow::anyhow!(
                        "memory storage backend cannot be used in production"
                    ));
                }
            }
        }

        let prefixes = [
            ("STAGING_PREFIX", &self.staging_prefix),
            ("DOCUMENT_PREFIX", &self.document_prefix),
            ("REPORT_PREFIX", &self.report_prefix),
        ];
        for (name, prefix) in prefixes {
            if prefix.trim_matches('/').is_empty() {
                return Err(anyhow::anyhow!("{} must not be empty", name));
            }
        }
        if self.staging_prefix == self.document_prefix {
            return Err(anyhow::anyhow!(
                "STAGING_PREFIX and DOCUMENT_PREFIX must differ"
            ));
        }

        if self.allowed_content_types.is_empty() {
            return Err(anyhow::anyhow!(
                "ALLOWED_CONTENT_TYPES must list at least one content type"
            ));
        }

        if self.min_file_set_bytes > self.max_file_set_bytes {
            return Err(anyhow::anyhow!(
                "MIN_FILE_SET_BYTES ({}) exceeds the maximum file set size ({} bytes)",
                self.min_file_set_bytes,
                self.max_file_set_bytes
            ));
        }

        if self.retry_max_attempts == 0 {
            return Err(anyhow::anyhow!("RETRY_MAX_ATTEMPTS must be at least 1"));
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(anyhow::anyhow!(
                "RETRY_BASE_DELAY_MS must not exceed RETRY_MAX_DELAY_MS"
            ));
        }

        if !(1..=10).contains(&self.sqs_batch_size) {
            return Err(anyhow::anyhow!("SQS_BATCH_SIZE must be between 1 and 10"));
        }

        if !(0..=20).contains(&self.sqs_wait_time_secs) {
            return Err(anyhow::anyhow!(
                "SQS_WAIT_TIME_SECS must be between 0 and 20"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, anyhow::Error> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_with_local_storage() {
        let config = config_from(&[
            ("STORAGE_BACKEND", "local"),
            ("LOCAL_STORAGE_PATH", "/tmp/lg"),
        ])
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.storage_backend(), StorageBackend::Local);
        assert_eq!(config.allowed_content_types(), ["application/pdf".to_string()]);
        assert_eq!(config.max_file_set_bytes(), 1024 * 1024 * 1024);
        assert_eq!(config.retry_max_attempts(), 3);
        assert!(config.database_url().is_none());
        assert!(config.clamav_fail_closed());
        assert!(!config.log_json());
    }

    #[test]
    fn test_lists_are_normalised() {
        let config = config_from(&[
            ("STORAGE_BACKEND", "local"),
            ("LOCAL_STORAGE_PATH", "/tmp/lg"),
            ("ALLOWED_CONTENT_TYPES", "Application/PDF, image/tiff ,"),
            ("REPORT_ODS_CODES", "a12345, Y12345"),
            ("LOG_FORMAT", "JSON"),
        ])
        .unwrap();

        assert_eq!(
            config.allowed_content_types(),
            ["application/pdf".to_string(), "image/tiff".to_string()]
        );
        assert_eq!(
            config.report_ods_codes(),
            ["A12345".to_string(), "Y12345".to_string()]
        );
        assert!(config.log_json());
    }

    #[test]
    fn test_s3_backend_requires_bucket() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.storage_backend(), StorageBackend::S3);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("S3_BUCKET"));
    }

    #[test]
    fn test_invalid_backend_is_rejected() {
        assert!(config_from(&[("STORAGE_BACKEND", "ftp")]).is_err());
    }

    #[test]
    fn test_retry_bounds_are_validated() {
        let config = config_from(&[
            ("S3_BUCKET", "lg-bucket"),
            ("RETRY_BASE_DELAY_MS", "10000"),
            ("RETRY_MAX_DELAY_MS", "100"),
        ])
        .unwrap();
        assert!(config.validate().is_err());

        let config = config_from(&[("S3_BUCKET", "lg-bucket"), ("RETRY_MAX_ATTEMPTS", "0")])
            .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_url_must_be_postgres() {
        let config = config_from(&[
            ("S3_BUCKET", "lg-bucket"),
            ("DATABASE_URL", "mysql://localhost/lg"),
        ])
        .unwrap();
        assert!(config.validate().is_err());

        let config = config_from(&[
            ("S3_BUCKET", "lg-bucket"),
            ("DATABASE_URL", "postgres://localhost/lg"),
        ])
        .unwrap();
        config.validate().unwrap();
    }
}
