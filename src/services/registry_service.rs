//! Draft Registry — lists draft-stage objects, correlates each with its
//! deployed counterpart, and derives an approval status per draft.

use crate::errors::PipelineError;
use crate::keys;
use crate::models::draft::{ApprovalStatus, DraftInfo, SiteApproval};
use crate::models::object::StoredObject;
use crate::services::storage_service::{ListParams, StorageService};
use std::collections::HashMap;

/// Metadata keys written by the approval transition on deployed copies.
pub const META_APPROVED_SOURCE: &str = "approvedSource";
pub const META_APPROVED_VERSION: &str = "approvedVersion";
pub const META_APPROVED_AT: &str = "approvedAt";

const PAGE_SIZE: usize = 1000;
/// Hard ceiling on deployed-prefix pages walked per listing call, so one
/// runaway bucket cannot pin a request forever.
const MAX_DEPLOY_PAGES: usize = 50;

#[derive(Clone)]
pub struct RegistryService {
    storage: StorageService,
    deploy_prefix: String,
}

impl RegistryService {
    pub fn new(storage: StorageService, deploy_prefix: impl Into<String>) -> Self {
        Self {
            storage,
            deploy_prefix: deploy_prefix.into(),
        }
    }

    /// List draft objects under `prefix`, bounded by `limit`, each with its
    /// derived approval status.
    ///
    /// The deployed area is listed once per call and reduced to a map of
    /// approval key -> most-recently-updated deployed object. Backend
    /// failures surface as `BackendUnavailable` so a caller can tell "no
    /// drafts" apart from "listing failed".
    pub async fn list_drafts(
        &self,
        bucket: &str,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<DraftInfo>, PipelineError> {
        let deployed = self.deployed_by_approval_key(bucket).await?;

        let mut drafts = Vec::new();
        let mut page_token = None;
        loop {
            let remaining = limit.saturating_sub(drafts.len());
            if remaining == 0 {
                break;
            }
            let page = self
                .storage
                .list_objects(
                    bucket,
                    ListParams {
                        prefix: Some(prefix.to_string()),
                        page_token,
                        max_keys: remaining.min(PAGE_SIZE),
                    },
                )
                .await?;

            for obj in page.objects {
                drafts.push(self.describe_draft(obj, &deployed));
            }

            page_token = page.next_page_token;
            if !page.is_truncated || page_token.is_none() {
                break;
            }
        }

        Ok(drafts)
    }

    /// Walk the deployed prefix and keep, per approval key, the deployed
    /// object with the latest `last_modified` (first seen wins ties, so the
    /// result is deterministic for a fixed listing order).
    async fn deployed_by_approval_key(
        &self,
        bucket: &str,
    ) -> Result<HashMap<String, StoredObject>, PipelineError> {
        let mut by_key: HashMap<String, StoredObject> = HashMap::new();
        let mut page_token = None;

        for _ in 0..MAX_DEPLOY_PAGES {
            let page = self
                .storage
                .list_objects(
                    bucket,
                    ListParams {
                        prefix: Some(self.deploy_prefix.clone()),
                        page_token,
                        max_keys: PAGE_SIZE,
                    },
                )
                .await?;

            for obj in page.objects {
                let Some(parsed) = keys::parse_asset_path(&obj.key) else {
                    continue;
                };
                let approval_key = keys::approval_key(&parsed.language, &parsed.item_id);
                if approval_key.is_empty() {
                    continue;
                }
                match by_key.get(&approval_key) {
                    Some(existing) if existing.last_modified >= obj.last_modified => {}
                    _ => {
                        by_key.insert(approval_key, obj);
                    }
                }
            }

            page_token = page.next_page_token;
            if !page.is_truncated || page_token.is_none() {
                break;
            }
        }

        Ok(by_key)
    }

    fn describe_draft(
        &self,
        obj: StoredObject,
        deployed: &HashMap<String, StoredObject>,
    ) -> DraftInfo {
        let parsed = keys::parse_asset_path(&obj.key);
        let site_approval = match &parsed {
            Some(key) => {
                let approval_key = keys::approval_key(&key.language, &key.item_id);
                if approval_key.is_empty() {
                    SiteApproval::not_approved()
                } else {
                    match deployed.get(&approval_key) {
                        Some(deployed_obj) => approval_for(&obj, deployed_obj),
                        None => SiteApproval::not_approved(),
                    }
                }
            }
            // Unparseable paths are uncorrelatable; listed, never approved.
            None => SiteApproval::not_approved(),
        };

        DraftInfo {
            path: obj.key,
            bucket: obj.bucket,
            size_bytes: obj.size_bytes,
            content_type: obj.content_type,
            generation: obj.generation,
            updated: Some(obj.last_modified),
            language: parsed.as_ref().map(|k| k.language.clone()),
            item_id: parsed.as_ref().map(|k| k.item_id.clone()),
            revision: parsed.as_ref().and_then(|k| k.revision),
            site_approval,
        }
    }
}

/// Status rule for one draft against the deployed copy sharing its approval
/// key:
/// - explicit `approvedSource` metadata: `approved` iff it equals this
///   draft's path exactly, else `stale`;
/// - no such metadata (legacy copies): `approved` when the deployed
///   timestamp is not older than the draft's, else `stale`.
fn approval_for(draft: &StoredObject, deployed: &StoredObject) -> SiteApproval {
    let metadata = deployed.metadata();
    let approved_source = metadata.get(META_APPROVED_SOURCE).cloned();

    let status = match &approved_source {
        Some(source) if source == &draft.key => ApprovalStatus::Approved,
        Some(_) => ApprovalStatus::Stale,
        None => {
            if deployed.last_modified >= draft.last_modified {
                ApprovalStatus::Approved
            } else {
                ApprovalStatus::Stale
            }
        }
    };

    SiteApproval {
        status,
        deploy_path: Some(deployed.key.clone()),
        deploy_updated: Some(deployed.last_modified),
        approved_source,
        approved_version: metadata.get(META_APPROVED_VERSION).cloned(),
        approved_at: metadata.get(META_APPROVED_AT).cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::draft::ApprovalStatus;
    use crate::services::storage_service::tests::test_service;
    use bytes::Bytes;
    use std::collections::HashMap;

    const BUCKET: &str = "drafts";

    fn approval_meta(source: &str) -> HashMap<String, String> {
        HashMap::from([
            (META_APPROVED_SOURCE.to_string(), source.to_string()),
            (META_APPROVED_VERSION.to_string(), "1".to_string()),
            (META_APPROVED_AT.to_string(), "2026-01-01T00:00:00Z".to_string()),
        ])
    }

    async fn registry() -> (RegistryService, tempfile::TempDir) {
        let (storage, dir) = test_service().await;
        (RegistryService::new(storage.clone(), "deploy/"), dir)
    }

    fn status_of<'a>(drafts: &'a [DraftInfo], path: &str) -> &'a SiteApproval {
        &drafts
            .iter()
            .find(|d| d.path == path)
            .unwrap_or_else(|| panic!("draft {} not listed", path))
            .site_approval
    }

    #[tokio::test]
    async fn draft_without_deployed_copy_is_not_approved() {
        let (registry, _dir) = registry().await;
        registry
            .storage
            .put_object(BUCKET, "audio/es/cat.mp3", Bytes::from_static(b"x"), None, None)
            .await
            .unwrap();

        let drafts = registry.list_drafts(BUCKET, "audio/", 100).await.unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].site_approval.status, ApprovalStatus::NotApproved);
        assert_eq!(drafts[0].language.as_deref(), Some("es"));
    }

    #[tokio::test]
    async fn explicit_approved_source_governs_status() {
        let (registry, _dir) = registry().await;
        let storage = &registry.storage;

        storage
            .put_object(BUCKET, "audio/es/cat.mp3", Bytes::from_static(b"x"), None, None)
            .await
            .unwrap();
        storage
            .put_object(BUCKET, "audio/es/cat_v002.mp3", Bytes::from_static(b"y"), None, None)
            .await
            .unwrap();
        storage
            .put_object(
                BUCKET,
                "deploy/es/cat.mp3",
                Bytes::from_static(b"x"),
                None,
                Some(&approval_meta("audio/es/cat.mp3")),
            )
            .await
            .unwrap();

        let drafts = registry.list_drafts(BUCKET, "audio/", 100).await.unwrap();
        assert_eq!(drafts.len(), 2);

        let original = status_of(&drafts, "audio/es/cat.mp3");
        assert_eq!(original.status, ApprovalStatus::Approved);
        assert_eq!(original.deploy_path.as_deref(), Some("deploy/es/cat.mp3"));
        assert_eq!(original.approved_source.as_deref(), Some("audio/es/cat.mp3"));

        // Same approval key, different revision path: the recorded source
        // does not match, so the newer draft reads as stale.
        let newer = status_of(&drafts, "audio/es/cat_v002.mp3");
        assert_eq!(newer.status, ApprovalStatus::Stale);
    }

    #[tokio::test]
    async fn timestamp_fallback_when_metadata_absent() {
        let (registry, _dir) = registry().await;
        let storage = &registry.storage;

        // Deployed copy written after the draft: approved.
        storage
            .put_object(BUCKET, "audio/fr/dog.mp3", Bytes::from_static(b"x"), None, None)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        storage
            .put_object(BUCKET, "deploy/fr/dog.mp3", Bytes::from_static(b"x"), None, None)
            .await
            .unwrap();

        // Deployed copy older than the draft: stale.
        storage
            .put_object(BUCKET, "deploy/fr/bird.mp3", Bytes::from_static(b"x"), None, None)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        storage
            .put_object(BUCKET, "audio/fr/bird.mp3", Bytes::from_static(b"x"), None, None)
            .await
            .unwrap();

        let drafts = registry.list_drafts(BUCKET, "audio/", 100).await.unwrap();
        assert_eq!(status_of(&drafts, "audio/fr/dog.mp3").status, ApprovalStatus::Approved);
        assert_eq!(status_of(&drafts, "audio/fr/bird.mp3").status, ApprovalStatus::Stale);
    }

    #[tokio::test]
    async fn newest_deployed_copy_wins_per_approval_key() {
        let (registry, _dir) = registry().await;
        let storage = &registry.storage;

        storage
            .put_object(BUCKET, "audio/de/wort_v003.mp3", Bytes::from_static(b"x"), None, None)
            .await
            .unwrap();
        // Two deployed entries reduce to the same approval key; the later
        // write must win the correlation.
        storage
            .put_object(
                BUCKET,
                "deploy/de/wort_v001.mp3",
                Bytes::from_static(b"x"),
                None,
                Some(&approval_meta("audio/de/wort_v001.mp3")),
            )
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        storage
            .put_object(
                BUCKET,
                "deploy/de/wort.mp3",
                Bytes::from_static(b"x"),
                None,
                Some(&approval_meta("audio/de/wort_v003.mp3")),
            )
            .await
            .unwrap();

        let drafts = registry.list_drafts(BUCKET, "audio/", 100).await.unwrap();
        let approval = status_of(&drafts, "audio/de/wort_v003.mp3");
        assert_eq!(approval.status, ApprovalStatus::Approved);
        assert_eq!(approval.deploy_path.as_deref(), Some("deploy/de/wort.mp3"));
    }

    #[tokio::test]
    async fn listing_respects_soft_limit() {
        let (registry, _dir) = registry().await;
        for i in 0..5 {
            registry
                .storage
                .put_object(
                    BUCKET,
                    &format!("audio/es/item{}.mp3", i),
                    Bytes::from_static(b"x"),
                    None,
                    None,
                )
                .await
                .unwrap();
        }
        let drafts = registry.list_drafts(BUCKET, "audio/", 3).await.unwrap();
        assert_eq!(drafts.len(), 3);
    }
}
