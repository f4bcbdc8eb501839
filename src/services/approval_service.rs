//! Approval Transition and storage housekeeping.
//!
//! Approving a draft server-side-copies it into the deployed area under its
//! unversioned name and records provenance metadata on the copy. Batch
//! operations here are per-item tolerant: one bad path never aborts the rest.

use crate::keys;
use crate::models::batch::{ItemResult, ItemStatus};
use crate::models::object::StoredObject;
use crate::services::registry_service::{
    META_APPROVED_AT, META_APPROVED_SOURCE, META_APPROVED_VERSION,
};
use crate::services::storage_service::{StorageError, StorageService};
use crate::errors::PipelineError;
use chrono::Utc;
use futures::StreamExt;
use std::collections::HashMap;
use tracing::{info, warn};

/// Upper bound on in-flight per-file storage operations within one request.
const BATCH_CONCURRENCY: usize = 8;

#[derive(Clone)]
pub struct ApprovalService {
    storage: StorageService,
    deploy_prefix: String,
}

impl ApprovalService {
    pub fn new(storage: StorageService, deploy_prefix: impl Into<String>) -> Self {
        Self {
            storage,
            deploy_prefix: deploy_prefix.into(),
        }
    }

    /// Approve a batch of draft paths, one result per input path, in input
    /// order. Underivable paths and missing sources are `skipped`; backend
    /// failures on one path are reported as `error` without touching the
    /// rest of the batch.
    pub async fn approve(&self, bucket: &str, paths: Vec<String>) -> Vec<ItemResult> {
        futures::stream::iter(paths.into_iter().map(|path| self.approve_one(bucket, path)))
            .buffered(BATCH_CONCURRENCY)
            .collect()
            .await
    }

    async fn approve_one(&self, bucket: &str, path: String) -> ItemResult {
        let Some(parsed) = keys::parse_asset_path(&path) else {
            return ItemResult::with_reason(path, ItemStatus::Skipped, "unrecognized draft path");
        };

        // Destination is always the unversioned name under the deployed
        // prefix; re-approval overwrites rather than versions.
        let deploy_path = format!(
            "{}{}/{}",
            self.deploy_prefix,
            parsed.language,
            parsed.deployed_file_name()
        );

        let source = match self.storage.get_object_metadata(bucket, &path).await {
            Ok(obj) => obj,
            Err(StorageError::ObjectNotFound { .. }) => {
                return ItemResult::with_reason(path, ItemStatus::Skipped, "source object not found");
            }
            Err(err) => {
                return ItemResult::with_reason(path, ItemStatus::Error, err.to_string());
            }
        };

        let metadata = HashMap::from([
            (META_APPROVED_SOURCE.to_string(), path.clone()),
            (META_APPROVED_VERSION.to_string(), source.generation.to_string()),
            (META_APPROVED_AT.to_string(), Utc::now().to_rfc3339()),
        ]);

        match self
            .storage
            .copy_object(bucket, &path, bucket, &deploy_path, Some(&metadata))
            .await
        {
            Ok(_) => {
                info!("approved {} -> {}", path, deploy_path);
                ItemResult::deployed(path, deploy_path)
            }
            Err(err) => {
                warn!("approval copy failed for {}: {}", path, err);
                ItemResult::with_reason(path, ItemStatus::Error, err.to_string())
            }
        }
    }

    /// Move an object between storage tiers: copy (preserving custom
    /// metadata), verify the copy landed, then delete the source. The source
    /// is never deleted before the copy is confirmed.
    pub async fn move_object(
        &self,
        bucket: &str,
        path: &str,
        target_bucket: &str,
    ) -> Result<StoredObject, PipelineError> {
        let moved = self
            .storage
            .copy_object(bucket, path, target_bucket, path, None)
            .await?;

        if !self.storage.exists(target_bucket, path).await? {
            return Err(PipelineError::BackendUnavailable(format!(
                "copy of `{}` to bucket `{}` did not land",
                path, target_bucket
            )));
        }

        self.storage.delete_object(bucket, path).await?;
        info!("moved {} from {} to {}", path, bucket, target_bucket);
        Ok(moved)
    }

    /// Delete a batch of draft objects with the same per-item tolerance as
    /// `approve`: `deleted`, `missing`, or `error` per path.
    pub async fn delete_many(&self, bucket: &str, paths: Vec<String>) -> Vec<ItemResult> {
        futures::stream::iter(paths.into_iter().map(|path| self.delete_one(bucket, path)))
            .buffered(BATCH_CONCURRENCY)
            .collect()
            .await
    }

    async fn delete_one(&self, bucket: &str, path: String) -> ItemResult {
        match self.storage.delete_object(bucket, &path).await {
            Ok(_) => ItemResult::bare(path, ItemStatus::Deleted),
            Err(StorageError::ObjectNotFound { .. }) => ItemResult::bare(path, ItemStatus::Missing),
            Err(err) => ItemResult::with_reason(path, ItemStatus::Error, err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage_service::tests::test_service;
    use bytes::Bytes;

    const BUCKET: &str = "drafts";

    async fn service() -> (ApprovalService, tempfile::TempDir) {
        let (storage, dir) = test_service().await;
        (ApprovalService::new(storage, "deploy/"), dir)
    }

    #[tokio::test]
    async fn mixed_batch_reports_each_item_independently() {
        let (svc, _dir) = service().await;
        svc.storage
            .put_object(BUCKET, "audio/es/cat_v002.mp3", Bytes::from_static(b"meow"), None, None)
            .await
            .unwrap();

        let results = svc
            .approve(
                BUCKET,
                vec![
                    "audio/es/missing.mp3".into(),
                    "audio/../escape.mp3".into(),
                    "audio/es/cat_v002.mp3".into(),
                ],
            )
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].status, ItemStatus::Skipped);
        assert_eq!(results[1].status, ItemStatus::Skipped);
        assert_eq!(results[2].status, ItemStatus::Deployed);
        assert_eq!(results[2].deploy_path.as_deref(), Some("deploy/es/cat.mp3"));

        // The valid file's copy really happened, with provenance metadata.
        let deployed = svc
            .storage
            .get_object_metadata(BUCKET, "deploy/es/cat.mp3")
            .await
            .unwrap();
        let meta = deployed.metadata();
        assert_eq!(
            meta.get(META_APPROVED_SOURCE).map(String::as_str),
            Some("audio/es/cat_v002.mp3")
        );
        assert_eq!(meta.get(META_APPROVED_VERSION).map(String::as_str), Some("1"));
        assert!(meta.contains_key(META_APPROVED_AT));
    }

    #[tokio::test]
    async fn reapproval_overwrites_the_deployed_copy() {
        let (svc, _dir) = service().await;
        svc.storage
            .put_object(BUCKET, "audio/es/cat.mp3", Bytes::from_static(b"a"), None, None)
            .await
            .unwrap();
        svc.storage
            .put_object(BUCKET, "audio/es/cat_v002.mp3", Bytes::from_static(b"bb"), None, None)
            .await
            .unwrap();

        svc.approve(BUCKET, vec!["audio/es/cat.mp3".into()]).await;
        svc.approve(BUCKET, vec!["audio/es/cat_v002.mp3".into()]).await;

        let deployed = svc
            .storage
            .get_object_metadata(BUCKET, "deploy/es/cat.mp3")
            .await
            .unwrap();
        assert_eq!(deployed.generation, 2);
        assert_eq!(
            deployed.metadata().get(META_APPROVED_SOURCE).map(String::as_str),
            Some("audio/es/cat_v002.mp3")
        );
    }

    #[tokio::test]
    async fn move_copies_then_deletes_and_keeps_metadata() {
        let (svc, _dir) = service().await;
        let meta = HashMap::from([("origin".to_string(), "tts".to_string())]);
        svc.storage
            .put_object(BUCKET, "audio/fr/dog.mp3", Bytes::from_static(b"woof"), None, Some(&meta))
            .await
            .unwrap();

        let moved = svc.move_object(BUCKET, "audio/fr/dog.mp3", "archive").await.unwrap();
        assert_eq!(moved.metadata().get("origin").map(String::as_str), Some("tts"));

        assert!(!svc.storage.exists(BUCKET, "audio/fr/dog.mp3").await.unwrap());
        assert!(svc.storage.exists("archive", "audio/fr/dog.mp3").await.unwrap());
    }

    #[tokio::test]
    async fn delete_many_distinguishes_missing_from_deleted() {
        let (svc, _dir) = service().await;
        svc.storage
            .put_object(BUCKET, "audio/es/cat.mp3", Bytes::from_static(b"x"), None, None)
            .await
            .unwrap();

        let results = svc
            .delete_many(
                BUCKET,
                vec!["audio/es/cat.mp3".into(), "audio/es/ghost.mp3".into()],
            )
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, ItemStatus::Deleted);
        assert_eq!(results[1].status, ItemStatus::Missing);
        assert!(!svc.storage.exists(BUCKET, "audio/es/cat.mp3").await.unwrap());
    }
}
