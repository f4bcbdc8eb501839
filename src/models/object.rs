//! Metadata record for an object held in the storage backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

/// A single stored object, addressed by `(bucket, key)`.
///
/// Holds metadata only; payload bytes live on disk. `generation` increases
/// on every overwrite of the same key, mirroring the version identifier an
/// object storage backend assigns.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredObject {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Bucket (namespace) this object belongs to.
    pub bucket: String,

    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 checksum for integrity verification.
    pub etag: Option<String>,

    /// Monotonic per-key write counter assigned by the backend.
    pub generation: i64,

    /// User-defined metadata, stored as a JSON object string.
    pub custom_metadata: Option<String>,

    /// Timestamp when the object was last written.
    pub last_modified: DateTime<Utc>,
}

impl StoredObject {
    /// Decode the custom metadata column into a map. Absent or malformed
    /// metadata decodes to an empty map.
    pub fn metadata(&self) -> HashMap<String, String> {
        self.custom_metadata
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}
