//! Assembly shared by the `lg-ingest` and `lg-report` binaries.
//!
//! Configuration comes from the environment (see [`lg_core::Config`]); these helpers
//! turn it into the collaborators the worker and the report job need.

use anyhow::{Context, Result};
use lg_core::Config;
use lg_db::Stores;
use lg_infra::RetryPolicy;
use lg_services::{DemographicsLookup, VirusScanner};
use lg_storage::{Storage, StorageLayout};
use lg_worker::{BatchProcessor, PipelineSettings, UploadPipeline};
use std::sync::Arc;

/// The ClamAV scanner when scanning is enabled.
pub fn virus_scanner(config: &Config) -> Option<Arc<dyn VirusScanner>> {
    if !config.clamav_enabled() {
        tracing::warn!("ClamAV disabled; files will not pass the virus scan gate");
        return None;
    }
    tracing::info!(
        host = config.clamav_host(),
        port = config.clamav_port(),
        fail_closed = config.clamav_fail_closed(),
        "ClamAV scanner configured"
    );
    Some(Arc::new(lg_services::ClamAvScanner::from_config(config)))
}

/// The demographics client when `PDS_BASE_URL` is set.
pub fn demographics(config: &Config) -> Result<Option<Arc<dyn DemographicsLookup>>> {
    let client = lg_services::PdsClient::from_config(config)
        .context("Failed to create demographics client")?;
    match client {
        Some(client) => {
            tracing::info!("Demographics lookup enabled");
            Ok(Some(Arc::new(client)))
        }
        None => {
            tracing::info!("PDS_BASE_URL not set; uploader practice is used as the registered practice");
            Ok(None)
        }
    }
}

/// Build the batch processor the worker feeds queue messages into.
pub fn build_processor(
    config: &Config,
    storage: Arc<dyn Storage>,
    stores: &Stores,
    scanner: Option<Arc<dyn VirusScanner>>,
    demographics: Option<Arc<dyn DemographicsLookup>>,
) -> BatchProcessor {
    let pipeline = UploadPipeline::new(
        StorageLayout::from_config(config),
        storage,
        stores.documents.clone(),
        scanner,
        demographics,
        PipelineSettings::from_config(config),
    );
    BatchProcessor::new(
        Arc::new(pipeline),
        stores.reports.clone(),
        RetryPolicy::from_config(config),
    )
}
