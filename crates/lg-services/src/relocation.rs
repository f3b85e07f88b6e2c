//! Staging to permanent storage moves.
//!
//! A relocation is safe to repeat: whatever a previous attempt left behind, the same call
//! converges on one object at the permanent key and no staging copy.

use lg_core::{Config, IngestError};
use lg_db::{DocumentReferenceStore, StoreError};
use lg_infra::{with_retry, RetryPolicy};
use lg_storage::{Storage, StorageError};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationOutcome {
    /// Copied to the permanent key and removed from staging.
    Moved,
    /// Both copies existed with the same length; only the staging copy was removed.
    StagingCleaned,
    /// Nothing left to move.
    AlreadyRelocated,
}

pub struct StorageRelocator {
    storage: Arc<dyn Storage>,
    documents: Arc<dyn DocumentReferenceStore>,
    retry: RetryPolicy,
}

impl StorageRelocator {
    pub fn new(
        storage: Arc<dyn Storage>,
        documents: Arc<dyn DocumentReferenceStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            storage,
            documents,
            retry,
        }
    }

    pub fn from_config(
        storage: Arc<dyn Storage>,
        documents: Arc<dyn DocumentReferenceStore>,
        config: &Config,
    ) -> Self {
        Self::new(storage, documents, RetryPolicy::from_config(config))
    }

    /// Move `staging_key` to `permanent_key` and point document `id` at its new location.
    #[tracing::instrument(skip(self), fields(document_id = %id))]
    pub async fn relocate(
        &self,
        id: Uuid,
        staging_key: &str,
        permanent_key: &str,
    ) -> Result<RelocationOutcome, IngestError> {
        let source = self.size_of(staging_key).await?;
        let destination = self.size_of(permanent_key).await?;

        let outcome = match (source, destination) {
            (None, None) => {
                return Err(IngestError::file_set_invalid(format!(
                    "file not found: {}",
                    staging_key
                )));
            }
            (None, Some(_)) => RelocationOutcome::AlreadyRelocated,
            (Some(source_len), Some(dest_len)) if source_len == dest_len => {
                self.remove_staging(staging_key).await?;
                RelocationOutcome::StagingCleaned
            }
            (Some(_), _) => {
                with_retry(&self.retry, "storage copy", StorageError::is_transient, || {
                    self.storage.copy(staging_key, permanent_key)
                })
                .await
                .map_err(|e| IngestError::infrastructure("copy to permanent storage", e))?;
                self.remove_staging(staging_key).await?;
                RelocationOutcome::Moved
            }
        };

        with_retry(&self.retry, "update location", StoreError::is_transient, || {
            self.documents.update_location(id, permanent_key)
        })
        .await
        .map_err(|e| e.into_ingest("update document location"))?;

        tracing::debug!(?outcome, permanent_key, "File relocated");
        Ok(outcome)
    }

    async fn size_of(&self, key: &str) -> Result<Option<u64>, IngestError> {
        match with_retry(&self.retry, "storage head", StorageError::is_transient, || {
            self.storage.content_length(key)
        })
        .await
        {
            Ok(size) => Ok(Some(size)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(err) => Err(IngestError::infrastructure("check file before relocation", err)),
        }
    }

    async fn remove_staging(&self, staging_key: &str) -> Result<(), IngestError> {
        with_retry(&self.retry, "storage delete", StorageError::is_transient, || {
            self.storage.delete(staging_key)
        })
        .await
        .map_err(|e| IngestError::infrastructure("remove staging copy", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lg_core::models::{document_id_for, DocumentReference};
    use lg_db::MemoryDocumentStore;
    use lg_storage::MemoryStorage;

    const STAGING: &str = "staging/9000000009/1of1_a.pdf";

    async fn setup() -> (StorageRelocator, Arc<MemoryStorage>, Arc<MemoryDocumentStore>, Uuid, String) {
        let storage = Arc::new(MemoryStorage::new());
        let documents = Arc::new(MemoryDocumentStore::new());
        let id = document_id_for("9000000009", STAGING);
        documents
            .create(&DocumentReference::new(
                id,
                "9000000009",
                "application/pdf",
                "1of1_a.pdf",
                STAGING,
                "A12345",
                Utc::now(),
            ))
            .await
            .unwrap();
        let relocator =
            StorageRelocator::new(storage.clone(), documents.clone(), RetryPolicy::no_retry());
        (relocator, storage, documents, id, format!("lloyd-george/9000000009/{}", id))
    }

    #[tokio::test]
    async fn test_relocate_twice_is_a_no_op() {
        let (relocator, storage, documents, id, permanent) = setup().await;
        storage
            .upload_with_key(STAGING, b"%PDF-1.4".to_vec(), "application/pdf")
            .await
            .unwrap();

        let first = relocator.relocate(id, STAGING, &permanent).await.unwrap();
        let second = relocator.relocate(id, STAGING, &permanent).await.unwrap();

        assert_eq!(first, RelocationOutcome::Moved);
        assert_eq!(second, RelocationOutcome::AlreadyRelocated);
        assert!(storage.keys_with_prefix("staging/").is_empty());
        assert_eq!(storage.keys_with_prefix("lloyd-george/"), vec![permanent.clone()]);
        assert_eq!(
            documents.get(id).await.unwrap().unwrap().file_location,
            permanent
        );
    }

    #[tokio::test]
    async fn test_interrupted_move_cleans_staging() {
        let (relocator, storage, _, id, permanent) = setup().await;
        for key in [STAGING, permanent.as_str()] {
            storage
                .upload_with_key(key, b"%PDF-1.4".to_vec(), "application/pdf")
                .await
                .unwrap();
        }

        let outcome = relocator.relocate(id, STAGING, &permanent).await.unwrap();
        assert_eq!(outcome, RelocationOutcome::StagingCleaned);
        assert!(!storage.exists(STAGING).await.unwrap());
    }

    #[tokio::test]
    async fn test_partial_destination_is_overwritten() {
        let (relocator, storage, _, id, permanent) = setup().await;
        storage
            .upload_with_key(STAGING, b"%PDF-1.4 full".to_vec(), "application/pdf")
            .await
            .unwrap();
        storage
            .upload_with_key(&permanent, b"%PDF".to_vec(), "application/pdf")
            .await
            .unwrap();

        assert_eq!(
            relocator.relocate(id, STAGING, &permanent).await.unwrap(),
            RelocationOutcome::Moved
        );
        assert_eq!(storage.download(&permanent).await.unwrap(), b"%PDF-1.4 full".to_vec());
    }

    #[tokio::test]
    async fn test_missing_everywhere_is_file_set_invalid() {
        let (relocator, _, documents, id, permanent) = setup().await;
        let err = relocator.relocate(id, STAGING, &permanent).await.unwrap_err();
        assert!(matches!(err, IngestError::FileSetInvalid(_)));
        assert_eq!(documents.get(id).await.unwrap().unwrap().file_location, STAGING);
    }
}
