//! Deploy queue document: paths flagged for inclusion in the next
//! repository commit, stored as one JSON document per bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One flagged path. Queue membership is independent of approval status:
/// a path may be flagged without being approved, and approval never clears
/// a flag.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeployQueueEntry {
    pub bucket: String,
    pub path: String,
    pub flagged_at: DateTime<Utc>,
}

/// The whole-document queue state for one bucket, keyed by path.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeployQueueDoc {
    #[serde(default)]
    pub entries: BTreeMap<String, DeployQueueEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Requested queue mutation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueAction {
    Flag,
    Clear,
}

/// Outcome counts for a queue mutation. Entries whose bucket does not match
/// the request's primary bucket are skipped silently and counted nowhere.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct QueueMutation {
    pub flagged: usize,
    pub cleared: usize,
}
