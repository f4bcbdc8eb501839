//! Deploy Queue — a persisted set of paths flagged for the next repository
//! commit, stored as one JSON document per bucket.
//!
//! Mutations read-modify-write the whole document. There is no cross-request
//! atomicity: concurrent mutators race and the last writer wins. Accepted
//! trade-off for a queue a handful of reviewers touch.

use crate::errors::PipelineError;
use crate::models::queue::{DeployQueueDoc, DeployQueueEntry, QueueAction, QueueMutation};
use crate::services::storage_service::{StorageError, StorageService};
use bytes::Bytes;
use chrono::Utc;
use tracing::warn;

/// Fixed key of the queue document within a bucket. Lives outside the draft
/// and deployed prefixes so it never shows up in listings.
const QUEUE_KEY: &str = "system/deploy-queue.json";

/// Identifies one path in a mutation request.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntryRef {
    pub bucket: String,
    pub path: String,
}

#[derive(Clone)]
pub struct QueueService {
    storage: StorageService,
}

impl QueueService {
    pub fn new(storage: StorageService) -> Self {
        Self { storage }
    }

    /// Read the queue document for a bucket. A missing document is an empty
    /// queue; an unreadable one is reset to empty with a warning rather than
    /// wedging every future mutation.
    pub async fn get(&self, bucket: &str) -> Result<DeployQueueDoc, PipelineError> {
        match self.storage.download(bucket, QUEUE_KEY).await {
            Ok((_, bytes)) => match serde_json::from_slice::<DeployQueueDoc>(&bytes) {
                Ok(doc) => Ok(doc),
                Err(err) => {
                    warn!("deploy queue document in `{}` is unreadable: {}", bucket, err);
                    Ok(DeployQueueDoc::default())
                }
            },
            Err(StorageError::ObjectNotFound { .. }) => Ok(DeployQueueDoc::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// Apply `flag` or `clear` for each entry against the bucket's queue
    /// document.
    ///
    /// Entries whose bucket differs from the request's primary bucket are
    /// silently skipped (a queue is scoped to one bucket). Flagging is
    /// idempotent per path: an existing entry is replaced with a fresh
    /// `flaggedAt`, never duplicated. Clearing a non-member is a no-op.
    pub async fn mutate(
        &self,
        bucket: &str,
        entries: Vec<QueueEntryRef>,
        action: QueueAction,
    ) -> Result<QueueMutation, PipelineError> {
        let mut doc = self.get(bucket).await?;
        let mut outcome = QueueMutation::default();

        for entry in entries {
            if entry.bucket != bucket {
                continue;
            }
            match action {
                QueueAction::Flag => {
                    doc.entries.insert(
                        entry.path.clone(),
                        DeployQueueEntry {
                            bucket: entry.bucket,
                            path: entry.path,
                            flagged_at: Utc::now(),
                        },
                    );
                    outcome.flagged += 1;
                }
                QueueAction::Clear => {
                    if doc.entries.remove(&entry.path).is_some() {
                        outcome.cleared += 1;
                    }
                }
            }
        }

        doc.updated_at = Some(Utc::now());
        let body = serde_json::to_vec(&doc)
            .map_err(|err| PipelineError::BackendUnavailable(err.to_string()))?;
        self.storage
            .put_object(
                bucket,
                QUEUE_KEY,
                Bytes::from(body),
                Some("application/json".into()),
                None,
            )
            .await?;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage_service::tests::test_service;

    const BUCKET: &str = "drafts";

    async fn service() -> (QueueService, tempfile::TempDir) {
        let (storage, dir) = test_service().await;
        (QueueService::new(storage), dir)
    }

    fn entry(bucket: &str, path: &str) -> QueueEntryRef {
        QueueEntryRef {
            bucket: bucket.into(),
            path: path.into(),
        }
    }

    #[tokio::test]
    async fn empty_queue_reads_as_empty_document() {
        let (svc, _dir) = service().await;
        let doc = svc.get(BUCKET).await.unwrap();
        assert!(doc.entries.is_empty());
        assert!(doc.updated_at.is_none());
    }

    #[tokio::test]
    async fn flag_then_clear_round_trips() {
        let (svc, _dir) = service().await;

        let out = svc
            .mutate(BUCKET, vec![entry(BUCKET, "audio/fr/dog.mp3")], QueueAction::Flag)
            .await
            .unwrap();
        assert_eq!(out.flagged, 1);

        let doc = svc.get(BUCKET).await.unwrap();
        assert!(doc.entries.contains_key("audio/fr/dog.mp3"));
        assert!(doc.updated_at.is_some());

        let out = svc
            .mutate(BUCKET, vec![entry(BUCKET, "audio/fr/dog.mp3")], QueueAction::Clear)
            .await
            .unwrap();
        assert_eq!(out.cleared, 1);
        assert!(svc.get(BUCKET).await.unwrap().entries.is_empty());
    }

    #[tokio::test]
    async fn reflagging_keeps_a_single_entry_with_fresh_timestamp() {
        let (svc, _dir) = service().await;

        svc.mutate(BUCKET, vec![entry(BUCKET, "audio/fr/dog.mp3")], QueueAction::Flag)
            .await
            .unwrap();
        let first = svc.get(BUCKET).await.unwrap().entries["audio/fr/dog.mp3"].flagged_at;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        svc.mutate(BUCKET, vec![entry(BUCKET, "audio/fr/dog.mp3")], QueueAction::Flag)
            .await
            .unwrap();

        let doc = svc.get(BUCKET).await.unwrap();
        assert_eq!(doc.entries.len(), 1);
        assert!(doc.entries["audio/fr/dog.mp3"].flagged_at > first);
    }

    #[tokio::test]
    async fn cross_bucket_entries_are_silently_skipped() {
        let (svc, _dir) = service().await;

        let out = svc
            .mutate(
                BUCKET,
                vec![
                    entry(BUCKET, "audio/fr/dog.mp3"),
                    entry("other-bucket", "audio/fr/cat.mp3"),
                ],
                QueueAction::Flag,
            )
            .await
            .unwrap();

        assert_eq!(out.flagged, 1);
        let doc = svc.get(BUCKET).await.unwrap();
        assert_eq!(doc.entries.len(), 1);
        assert!(!doc.entries.contains_key("audio/fr/cat.mp3"));
    }

    #[tokio::test]
    async fn clearing_a_non_member_is_a_no_op() {
        let (svc, _dir) = service().await;
        let out = svc
            .mutate(BUCKET, vec![entry(BUCKET, "audio/fr/ghost.mp3")], QueueAction::Clear)
            .await
            .unwrap();
        assert_eq!(out.cleared, 0);
    }
}
