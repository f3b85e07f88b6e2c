use async_trait::async_trait;
use clamav_client::{clean, Tcp};
use lg_core::models::VirusScanResult;
use lg_core::Config;
use std::str;
use std::time::{Duration, Instant};

use crate::virus_scan::{ScanError, VirusScanner};

/// ClamAV daemon client. Fail-open or fail-closed handling of transport errors is
/// decided by the scan gate, never here.
#[derive(Debug, Clone)]
pub struct ClamAvScanner {
    host: String,
    port: u16,
    /// Timeout in seconds for each scan operation (default: 30)
    timeout_secs: u64,
}

impl ClamAvScanner {
    pub fn new(host: String, port: u16) -> Self {
        Self::with_timeout(host, port, 30)
    }

    /// Create with a custom scan timeout (for large bundles or slow ClamAV instances).
    pub fn with_timeout(host: String, port: u16, timeout_secs: u64) -> Self {
        Self {
            host,
            port,
            timeout_secs,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::with_timeout(
            config.clamav_host().to_string(),
            config.clamav_port(),
            config.clamav_timeout_secs(),
        )
    }

    fn virus_name(response: &[u8]) -> String {
        let response_str = str::from_utf8(response).map(str::trim).unwrap_or("unknown");
        if !response_str.contains("FOUND") {
            return "unknown".to_string();
        }
        response_str
            .split(':')
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string()
    }
}

#[async_trait]
impl VirusScanner for ClamAvScanner {
    /// Runs the sync client inside `spawn_blocking` to avoid `!Send` futures.
    async fn scan(&self, file_name: &str, data: Vec<u8>) -> Result<VirusScanResult, ScanError> {
        let start = Instant::now();
        tracing::debug!(host = %self.host, port = %self.port, file_name, "Starting ClamAV scan");
        let address = format!("{}:{}", self.host, self.port);

        let result = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            tokio::task::spawn_blocking(move || {
                let connection = Tcp {
                    host_address: address.as_str(),
                };
                let response = clamav_client::scan_buffer(data.as_slice(), connection, None)
                    .map_err(|e| ScanError::Unavailable(format!("ClamAV scan error: {}", e)))?;
                let is_clean = clean(&response).map_err(|e| {
                    ScanError::Unavailable(format!("Failed to parse ClamAV response: {}", e))
                })?;
                Ok::<_, ScanError>((is_clean, response))
            }),
        )
        .await;

        match result {
            Ok(Ok(Ok((true, _)))) => {
                tracing::info!(
                    file_name,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "File scan completed: clean"
                );
                Ok(VirusScanResult::Clean)
            }
            Ok(Ok(Ok((false, response)))) => {
                tracing::warn!(
                    file_name,
                    duration_ms = start.elapsed().as_millis() as u64,
                    virus = %Self::virus_name(&response),
                    "File scan detected virus"
                );
                Ok(VirusScanResult::Infected)
            }
            Ok(Ok(Err(err))) => {
                tracing::error!(error = %err, "ClamAV scan failed");
                Err(err)
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "ClamAV scan panicked");
                Err(ScanError::Unavailable(format!(
                    "ClamAV scan task join error: {}",
                    e
                )))
            }
            Err(_) => {
                tracing::error!(timeout_secs = self.timeout_secs, "ClamAV scan timeout");
                Err(ScanError::Timeout(self.timeout_secs))
            }
        }
    }
}
