//! Draft listing shapes: a draft object plus its derived approval status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Approval status of a draft, derived at query time (never stored).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// No deployed object shares this draft's approval key.
    NotApproved,
    /// The deployed copy was approved from exactly this draft.
    Approved,
    /// A deployed copy exists but was approved from a different draft
    /// (or predates this one under the legacy timestamp fallback).
    Stale,
}

/// Approval record attached to each listed draft for UI consumption.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SiteApproval {
    pub status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<String>,
}

impl SiteApproval {
    pub fn not_approved() -> Self {
        Self {
            status: ApprovalStatus::NotApproved,
            deploy_path: None,
            deploy_updated: None,
            approved_source: None,
            approved_version: None,
            approved_at: None,
        }
    }
}

/// One draft object as returned by the registry listing.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DraftInfo {
    pub path: String,
    pub bucket: String,
    pub size_bytes: i64,
    pub content_type: Option<String>,
    pub generation: i64,
    pub updated: Option<DateTime<Utc>>,
    /// Language derived from the path; absent when the path is unparseable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<u32>,
    pub site_approval: SiteApproval,
}
