//! Per-item batch results. Every batch endpoint answers with a list aligned
//! 1:1 with the request plus per-category counts, never a bare boolean.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Deployed,
    Skipped,
    Error,
    Missing,
    Deleted,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Deployed => "deployed",
            ItemStatus::Skipped => "skipped",
            ItemStatus::Error => "error",
            ItemStatus::Missing => "missing",
            ItemStatus::Deleted => "deleted",
        }
    }
}

/// Outcome for one path in a batch operation.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    pub path: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Destination path, set on successful approval copies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy_path: Option<String>,
}

impl ItemResult {
    pub fn deployed(path: impl Into<String>, deploy_path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status: ItemStatus::Deployed,
            reason: None,
            deploy_path: Some(deploy_path.into()),
        }
    }

    pub fn with_reason(
        path: impl Into<String>,
        status: ItemStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            status,
            reason: Some(reason.into()),
            deploy_path: None,
        }
    }

    pub fn bare(path: impl Into<String>, status: ItemStatus) -> Self {
        Self {
            path: path.into(),
            status,
            reason: None,
            deploy_path: None,
        }
    }
}

/// Itemized batch response with outcome counts.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BatchResponse {
    pub results: Vec<ItemResult>,
    pub counts: BTreeMap<String, usize>,
}

impl BatchResponse {
    pub fn new(results: Vec<ItemResult>) -> Self {
        let mut counts = BTreeMap::new();
        for item in &results {
            *counts.entry(item.status.as_str().to_string()).or_insert(0) += 1;
        }
        Self { results, counts }
    }
}
