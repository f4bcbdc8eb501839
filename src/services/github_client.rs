//! Remote repository host interface and its GitHub git-data implementation.
//!
//! The committer talks to the host through the [`RepoHost`] trait so the
//! six-step commit sequence can be exercised against a scripted host in
//! tests. The real implementation drives GitHub's blob/tree/commit/ref
//! endpoints over `reqwest` with a client-level timeout.

use crate::errors::PipelineError;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// One blob placed in the new tree at a repository-relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub sha: String,
}

/// The git-data operations the committer consumes, in the order it calls
/// them. `update_ref` must be a compare-and-swap on the expected old SHA;
/// implementations must never blind-write the ref.
#[async_trait]
pub trait RepoHost: Send + Sync {
    /// Current head commit SHA of a branch.
    async fn get_branch_head(&self, branch: &str) -> Result<String, PipelineError>;

    /// Tree SHA referenced by a commit.
    async fn get_commit_tree(&self, commit_sha: &str) -> Result<String, PipelineError>;

    /// Create a blob from raw bytes, returning its SHA.
    async fn create_blob(&self, content: &[u8]) -> Result<String, PipelineError>;

    /// Create a tree layering `entries` over `base_tree_sha`.
    async fn create_tree(
        &self,
        base_tree_sha: &str,
        entries: &[TreeEntry],
    ) -> Result<String, PipelineError>;

    /// Create a commit referencing `tree_sha`, parented on `parent_sha`.
    async fn create_commit(
        &self,
        message: &str,
        tree_sha: &str,
        parent_sha: &str,
    ) -> Result<String, PipelineError>;

    /// Fast-forward the branch ref to `new_sha`, conditional on the head
    /// still being `expected_old_sha`. A lost race is a `Conflict`.
    async fn update_ref(
        &self,
        branch: &str,
        new_sha: &str,
        expected_old_sha: &str,
    ) -> Result<(), PipelineError>;
}

/// GitHub implementation of [`RepoHost`] for one `owner/name` repository.
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    repo: String,
    token: String,
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

impl GithubClient {
    pub fn new(
        api_base: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| PipelineError::Configuration(err.to_string()))?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            repo: repo.into(),
            token: token.into(),
        })
    }

    fn url(&self, tail: &str) -> String {
        format!("{}/repos/{}/{}", self.api_base, self.repo, tail)
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<Value, PipelineError> {
        let resp = req
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "asset-pipeline")
            .send()
            .await
            .map_err(|err| PipelineError::BackendUnavailable(format!("{}: {}", what, err)))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(PipelineError::NotFound(what.to_string()));
        }
        // GitHub answers 422 when the expected old SHA no longer matches.
        if status == StatusCode::CONFLICT || status == StatusCode::UNPROCESSABLE_ENTITY {
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Conflict(format!("{}: {}", what, body)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::BackendUnavailable(format!(
                "{}: HTTP {} {}",
                what, status, body
            )));
        }

        resp.json::<Value>()
            .await
            .map_err(|err| PipelineError::BackendUnavailable(format!("{}: {}", what, err)))
    }
}

/// Pull a SHA out of a response at the given JSON pointer.
fn sha_at(value: &Value, pointer: &str, what: &str) -> Result<String, PipelineError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            PipelineError::BackendUnavailable(format!("{}: malformed response", what))
        })
}

#[async_trait]
impl RepoHost for GithubClient {
    async fn get_branch_head(&self, branch: &str) -> Result<String, PipelineError> {
        let url = self.url(&format!("git/ref/heads/{}", branch));
        let body = self.send(self.http.get(&url), "get branch ref").await?;
        sha_at(&body, "/object/sha", "get branch ref")
    }

    async fn get_commit_tree(&self, commit_sha: &str) -> Result<String, PipelineError> {
        let url = self.url(&format!("git/commits/{}", commit_sha));
        let body = self.send(self.http.get(&url), "get commit").await?;
        sha_at(&body, "/tree/sha", "get commit")
    }

    async fn create_blob(&self, content: &[u8]) -> Result<String, PipelineError> {
        let url = self.url("git/blobs");
        let payload = json!({
            "content": general_purpose::STANDARD.encode(content),
            "encoding": "base64",
        });
        let body = self
            .send(self.http.post(&url).json(&payload), "create blob")
            .await?;
        sha_at(&body, "/sha", "create blob")
    }

    async fn create_tree(
        &self,
        base_tree_sha: &str,
        entries: &[TreeEntry],
    ) -> Result<String, PipelineError> {
        let url = self.url("git/trees");
        let tree: Vec<Value> = entries
            .iter()
            .map(|entry| {
                json!({
                    "path": entry.path,
                    "mode": "100644",
                    "type": "blob",
                    "sha": entry.sha,
                })
            })
            .collect();
        let payload = json!({ "base_tree": base_tree_sha, "tree": tree });
        let body = self
            .send(self.http.post(&url).json(&payload), "create tree")
            .await?;
        sha_at(&body, "/sha", "create tree")
    }

    async fn create_commit(
        &self,
        message: &str,
        tree_sha: &str,
        parent_sha: &str,
    ) -> Result<String, PipelineError> {
        let url = self.url("git/commits");
        let payload = json!({
            "message": message,
            "tree": tree_sha,
            "parents": [parent_sha],
        });
        let body = self
            .send(self.http.post(&url).json(&payload), "create commit")
            .await?;
        sha_at(&body, "/sha", "create commit")
    }

    async fn update_ref(
        &self,
        branch: &str,
        new_sha: &str,
        expected_old_sha: &str,
    ) -> Result<(), PipelineError> {
        debug!(
            "advancing {} from {} to {}",
            branch, expected_old_sha, new_sha
        );
        let url = self.url(&format!("git/refs/heads/{}", branch));
        // force=false makes the backend enforce the fast-forward condition;
        // a ref that moved since we resolved the base fails here, not after.
        let payload = json!({ "sha": new_sha, "force": false });
        self.send(self.http.patch(&url).json(&payload), "update ref")
            .await?;
        Ok(())
    }
}
