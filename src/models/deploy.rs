//! Repository deployment shapes: request files and the resulting commit.

use serde::{Deserialize, Serialize};

/// One source object requested for deployment, with an optional explicit
/// repository path. When absent, the path is derived from the object key.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequestFile {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
}

/// Mapping of one deployed file inside the commit.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeployedFile {
    pub source_path: String,
    pub repo_path: String,
    pub blob_sha: String,
}

/// An atomic deployment commit: either all files land in it, or the branch
/// ref is never moved.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeployCommit {
    pub repo: String,
    pub branch: String,
    pub base_sha: String,
    pub tree_sha: String,
    pub commit_sha: String,
    pub files: Vec<DeployedFile>,
}
