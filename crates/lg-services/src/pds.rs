//! Patient demographics (PDS) lookup
//!
//! The registered practice decides whether a successful upload is reported as
//! `Success`, `RegisteredElsewhere` or `Suspended`.

use async_trait::async_trait;
use lg_core::IngestError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PdsError {
    #[error("Patient not found: {0}")]
    PatientNotFound(String),

    #[error("Demographics request failed: {0}")]
    Request(String),

    #[error("Demographics service returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid demographics response: {0}")]
    InvalidResponse(String),
}

impl PdsError {
    pub fn is_transient(&self) -> bool {
        match self {
            PdsError::Request(_) => true,
            PdsError::Status { status, .. } => *status == 429 || *status >= 500,
            PdsError::PatientNotFound(_) | PdsError::InvalidResponse(_) => false,
        }
    }

    /// An unknown patient is a business failure, everything else is infrastructure.
    pub fn into_ingest(self) -> IngestError {
        match self {
            PdsError::PatientNotFound(masked) => {
                IngestError::InvalidResourceId(format!("patient {} not found", masked))
            }
            other => IngestError::infrastructure("demographics lookup", other),
        }
    }
}

#[async_trait]
pub trait DemographicsLookup: Send + Sync {
    /// ODS code of the patient's registered practice, or the suspended marker when the
    /// patient has none.
    async fn registered_practice(&self, nhs_number: &str) -> Result<String, PdsError>;
}

#[cfg(feature = "pds")]
pub use client::PdsClient;

#[cfg(feature = "pds")]
mod client {
    use super::*;
    use anyhow::{Context, Result};
    use lg_core::models::SUSPENDED_ODS_CODE;
    use lg_core::{mask_nhs_number, Config};
    use reqwest::{Client, StatusCode};
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Deserialize)]
    struct PatientResource {
        #[serde(rename = "generalPractitioner", default)]
        general_practitioner: Vec<PractitionerReference>,
    }

    #[derive(Debug, Deserialize)]
    struct PractitionerReference {
        #[serde(default)]
        identifier: Option<Identifier>,
    }

    #[derive(Debug, Deserialize)]
    struct Identifier {
        #[serde(default)]
        value: Option<String>,
    }

    /// FHIR `Patient` read against a PDS endpoint.
    #[derive(Debug, Clone)]
    pub struct PdsClient {
        http_client: Client,
        base_url: String,
    }

    impl PdsClient {
        pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
            let http_client = Client::builder()
                .timeout(timeout)
                .build()
                .context("Failed to create HTTP client for PDS")?;

            Ok(Self {
                http_client,
                base_url: base_url.trim_end_matches('/').to_string(),
            })
        }

        /// `None` when no `PDS_BASE_URL` is configured.
        pub fn from_config(config: &Config) -> Result<Option<Self>> {
            config
                .pds_base_url()
                .map(|url| Self::new(url, Duration::from_secs(config.pds_timeout_secs())))
                .transpose()
        }
    }

    #[async_trait]
    impl DemographicsLookup for PdsClient {
        async fn registered_practice(&self, nhs_number: &str) -> Result<String, PdsError> {
            let url = format!("{}/Patient/{}", self.base_url, nhs_number);
            let response = self
                .http_client
                .get(&url)
                .header("accept", "application/fhir+json")
                .send()
                .await
                .map_err(|e| PdsError::Request(e.to_string()))?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Err(PdsError::PatientNotFound(mask_nhs_number(nhs_number)));
            }
            if !status.is_success() {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(PdsError::Status {
                    status: status.as_u16(),
                    message,
                });
            }

            let patient: PatientResource = response
                .json()
                .await
                .map_err(|e| PdsError::InvalidResponse(e.to_string()))?;

            let practice = patient
                .general_practitioner
                .into_iter()
                .find_map(|gp| gp.identifier.and_then(|id| id.value))
                .map(|code| code.trim().to_uppercase())
                .filter(|code| !code.is_empty())
                .unwrap_or_else(|| SUSPENDED_ODS_CODE.to_string());

            tracing::debug!(
                nhs_number = %mask_nhs_number(nhs_number),
                practice = %practice,
                "Demographics lookup completed"
            );
            Ok(practice)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const PATIENT_PATH: &str = "/Patient/9000000009";

        fn client(server: &mockito::ServerGuard) -> PdsClient {
            PdsClient::new(&server.url(), Duration::from_secs(5)).unwrap()
        }

        #[tokio::test]
        async fn test_registered_practice_is_read() {
            let mut server = mockito::Server::new_async().await;
            let mock = server
                .mock("GET", PATIENT_PATH)
                .with_status(200)
                .with_header("content-type", "application/fhir+json")
                .with_body(
                    r#"{"resourceType":"Patient","id":"9000000009",
                        "generalPractitioner":[{"identifier":{"value":"a12345"}}]}"#,
                )
                .create_async()
                .await;

            let practice = client(&server)
                .registered_practice("9000000009")
                .await
                .unwrap();
            assert_eq!(practice, "A12345");
            mock.assert_async().await;
        }

        #[tokio::test]
        async fn test_no_practice_means_suspended() {
            let mut server = mockito::Server::new_async().await;
            server
                .mock("GET", PATIENT_PATH)
                .with_status(200)
                .with_body(r#"{"resourceType":"Patient","id":"9000000009"}"#)
                .create_async()
                .await;

            let practice = client(&server)
                .registered_practice("9000000009")
                .await
                .unwrap();
            assert_eq!(practice, SUSPENDED_ODS_CODE);
        }

        #[tokio::test]
        async fn test_unknown_patient_is_business_failure() {
            let mut server = mockito::Server::new_async().await;
            server
                .mock("GET", PATIENT_PATH)
                .with_status(404)
                .create_async()
                .await;

            let err = client(&server)
                .registered_practice("9000000009")
                .await
                .unwrap_err();
            assert!(!err.is_transient());
            assert!(matches!(err.into_ingest(), IngestError::InvalidResourceId(_)));
        }

        #[tokio::test]
        async fn test_server_error_is_transient() {
            let mut server = mockito::Server::new_async().await;
            server
                .mock("GET", PATIENT_PATH)
                .with_status(503)
                .with_body("unavailable")
                .create_async()
                .await;

            let err = client(&server)
                .registered_practice("9000000009")
                .await
                .unwrap_err();
            assert!(err.is_transient());
            assert!(matches!(err.into_ingest(), IngestError::Infrastructure { .. }));
        }

        #[tokio::test]
        async fn test_malformed_body_is_not_retried() {
            let mut server = mockito::Server::new_async().await;
            server
                .mock("GET", PATIENT_PATH)
                .with_status(200)
                .with_body("not json")
                .create_async()
                .await;

            let err = client(&server)
                .registered_practice("9000000009")
                .await
                .unwrap_err();
            assert!(matches!(err, PdsError::InvalidResponse(_)));
        }
    }
}
