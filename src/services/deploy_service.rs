//! Repository Committer — builds one atomic, multi-file commit from a batch
//! of approved objects.
//!
//! The sequence is linear with no backtracking: fetch contents, resolve the
//! base ref, create blobs, compose the tree, create the commit, advance the
//! ref. Any failure before the ref update leaves the branch untouched; a
//! failed ref update leaves orphaned blob/tree/commit objects, which is
//! acceptable garbage.

use crate::errors::PipelineError;
use crate::keys;
use crate::models::deploy::{DeployCommit, DeployRequestFile, DeployedFile};
use crate::services::github_client::{RepoHost, TreeEntry};
use crate::services::storage_service::StorageService;
use bytes::Bytes;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::info;

pub struct DeployService {
    storage: StorageService,
    host: Arc<dyn RepoHost>,
    repo: String,
    branch: String,
    /// Repository subtree all target paths must fall under.
    allowed_root: String,
}

struct PlannedFile {
    source_path: String,
    repo_path: String,
}

impl DeployService {
    pub fn new(
        storage: StorageService,
        host: Arc<dyn RepoHost>,
        repo: impl Into<String>,
        branch: impl Into<String>,
        allowed_root: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            host,
            repo: repo.into(),
            branch: branch.into(),
            allowed_root: allowed_root.into(),
        }
    }

    /// Commit a batch of source objects to the target branch.
    ///
    /// All-or-nothing at the content level: a single unreadable source fails
    /// the whole operation, because the commit must be a consistent
    /// snapshot. This deliberately differs from the per-item tolerance of
    /// the approval batch.
    pub async fn deploy(
        &self,
        bucket: &str,
        files: Vec<DeployRequestFile>,
        message: Option<String>,
    ) -> Result<DeployCommit, PipelineError> {
        if files.is_empty() {
            return Err(PipelineError::Validation("no files to deploy".into()));
        }

        // Validate every target path before any fetch or remote write; an
        // out-of-allowlist path is a hard error, not a skip.
        let planned: Vec<PlannedFile> = files
            .iter()
            .map(|file| self.plan_file(file))
            .collect::<Result<_, _>>()?;

        // Step 1: fetch all contents up front.
        let contents: Vec<Bytes> = try_join_all(planned.iter().map(|file| async {
            let (_, bytes) = self.storage.download(bucket, &file.source_path).await?;
            Ok::<_, PipelineError>(bytes)
        }))
        .await?;

        // Step 2: resolve the base head commit and its tree.
        let base_sha = self.host.get_branch_head(&self.branch).await?;
        let base_tree_sha = self.host.get_commit_tree(&base_sha).await?;

        // Step 3: one blob per file, order preserved.
        let blob_shas = try_join_all(
            contents
                .iter()
                .map(|bytes| self.host.create_blob(bytes)),
        )
        .await?;

        // Step 4: compose the new tree over the base tree.
        let entries: Vec<TreeEntry> = planned
            .iter()
            .zip(&blob_shas)
            .map(|(file, sha)| TreeEntry {
                path: file.repo_path.clone(),
                sha: sha.clone(),
            })
            .collect();
        let tree_sha = self.host.create_tree(&base_tree_sha, &entries).await?;

        // Step 5: create the commit object.
        let message = message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| format!("Deploy {} audio asset(s)", planned.len()));
        let commit_sha = self
            .host
            .create_commit(&message, &tree_sha, &base_sha)
            .await?;

        // Step 6: the single serialization point. A raced branch surfaces
        // as a retryable conflict from the host.
        self.host
            .update_ref(&self.branch, &commit_sha, &base_sha)
            .await?;

        info!(
            "deployed {} file(s) to {}@{} as {}",
            planned.len(),
            self.repo,
            self.branch,
            commit_sha
        );

        Ok(DeployCommit {
            repo: self.repo.clone(),
            branch: self.branch.clone(),
            base_sha,
            tree_sha,
            commit_sha,
            files: planned
                .into_iter()
                .zip(blob_shas)
                .map(|(file, blob_sha)| DeployedFile {
                    source_path: file.source_path,
                    repo_path: file.repo_path,
                    blob_sha,
                })
                .collect(),
        })
    }

    /// Resolve and validate the repository path for one source object.
    fn plan_file(&self, file: &DeployRequestFile) -> Result<PlannedFile, PipelineError> {
        if !keys::path_is_safe(&file.path) {
            return Err(PipelineError::Validation(format!(
                "unsafe source path `{}`",
                file.path
            )));
        }

        let repo_path = match &file.repo_path {
            Some(hint) => hint.clone(),
            None => {
                let parsed = keys::parse_asset_path(&file.path).ok_or_else(|| {
                    PipelineError::Validation(format!(
                        "cannot derive repository path from `{}`",
                        file.path
                    ))
                })?;
                format!(
                    "{}{}/{}",
                    self.allowed_root,
                    parsed.language,
                    parsed.deployed_file_name()
                )
            }
        };

        if !keys::path_is_safe(&repo_path) || !repo_path.starts_with(&self.allowed_root) {
            return Err(PipelineError::Validation(format!(
                "repository path `{}` is outside the allowed `{}` subtree",
                repo_path, self.allowed_root
            )));
        }

        Ok(PlannedFile {
            source_path: file.path.clone(),
            repo_path,
        })
    }
}
