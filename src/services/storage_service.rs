//! src/services/storage_service.rs
//!
//! StorageService — the object-store backend behind the pipeline, backed by
//! SQLite for metadata and local disk for payloads beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`. Buckets are implicit
//! namespaces; writing to a bucket creates its directory on demand.
//!
//! Every overwrite of a key bumps its `generation` counter and custom
//! metadata rides along in the metadata row, so callers can record
//! provenance (e.g. which draft an approved copy came from) without a
//! second round trip.

use crate::errors::PipelineError;
use crate::keys;
use crate::models::object::StoredObject;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
pub struct ListParams {
    pub prefix: Option<String>,
    pub page_token: Option<String>,
    pub max_keys: usize,
}

#[derive(Debug)]
pub struct ListResult {
    pub objects: Vec<StoredObject>,
    pub is_truncated: bool,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ObjectNotFound { bucket, key } => {
                PipelineError::NotFound(format!("object `{}` in bucket `{}`", key, bucket))
            }
            StorageError::InvalidObjectKey => {
                PipelineError::Validation("invalid object key".into())
            }
            StorageError::InvalidBucketName { name, reason } => {
                PipelineError::Validation(format!("bucket `{}` invalid: {}", name, reason))
            }
            // Listing/read failures must stay distinguishable from an empty
            // result, so they surface as backend-unavailable.
            StorageError::Sqlx(err) => PipelineError::BackendUnavailable(err.to_string()),
            StorageError::Io(err) => PipelineError::BackendUnavailable(err.to_string()),
        }
    }
}

impl From<StorageError> for crate::errors::AppError {
    fn from(err: StorageError) -> Self {
        PipelineError::from(err).into()
    }
}

/// StorageService provides the object-store operations the pipeline needs:
/// - Put an object (writes bytes to disk and upserts metadata into SQLite)
/// - Download / stream an object
/// - List objects under a prefix with pagination
/// - Server-side copy between keys and buckets
/// - Delete an object
///
/// This struct intentionally keeps a minimal surface area so it is easy to
/// test and reason about.
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

const OBJECT_COLUMNS: &str = "id, bucket, key, content_type, size_bytes, etag, \
                              generation, custom_metadata, last_modified";

impl StorageService {
    /// Create a new StorageService backed by the provided SQLite pool and
    /// using `base_path` as the root directory for object payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Key validation guarding every storage and filesystem operation.
    ///
    /// Rejects traversal, backslashes, empty segments, and control bytes via
    /// the shared path sanitizer, plus an upper length bound.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.len() > MAX_OBJECT_KEY_LEN || !keys::path_is_safe(key) {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// Enforces S3-like naming rules: 3–63 characters, lowercase letters,
    /// digits, dots, and hyphens, no leading/trailing punctuation.
    fn ensure_bucket_name_safe(&self, name: &str) -> StorageResult<()> {
        let len = name.len();
        if len < BUCKET_NAME_MIN_LEN || len > BUCKET_NAME_MAX_LEN {
            return Err(StorageError::InvalidBucketName {
                name: name.to_string(),
                reason: "must be between 3 and 63 characters".into(),
            });
        }

        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(StorageError::InvalidBucketName {
                name: name.to_string(),
                reason: "allowed characters are lowercase letters, digits, dots, and hyphens"
                    .into(),
            });
        }

        if name.starts_with('.')
            || name.ends_with('.')
            || name.starts_with('-')
            || name.ends_with('-')
            || name.contains("..")
        {
            return Err(StorageError::InvalidBucketName {
                name: name.to_string(),
                reason: "must start and end with a lowercase letter or digit".into(),
            });
        }

        Ok(())
    }

    /// Compute the physical base folder path for a bucket.
    fn bucket_root(&self, bucket: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(bucket);
        path
    }

    /// Generate two-level shard identifiers for an object key.
    ///
    /// Uses MD5(bucket/key) and returns the first two bytes as lowercase
    /// hexadecimal strings (00–ff). Reduces file count per directory.
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Construct a fully-qualified object payload path.
    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, key);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Fetch an object metadata record.
    ///
    /// Returns ObjectNotFound if the row is missing.
    async fn fetch_object(&self, bucket: &str, key: &str) -> StorageResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(&format!(
            "SELECT {} FROM objects WHERE bucket = ? AND key = ?",
            OBJECT_COLUMNS
        ))
        .bind(bucket)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    /// True when the object exists. Backend failures still propagate so
    /// callers never mistake an outage for absence.
    pub async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        match self.fetch_object(bucket, key).await {
            Ok(_) => Ok(true),
            Err(StorageError::ObjectNotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Stream-write an object to disk and upsert its metadata row.
    ///
    /// - Writes bytes incrementally to a temporary file.
    /// - Computes MD5/etag and size while streaming.
    /// - Atomically renames into final location.
    /// - Upserts the metadata row, bumping `generation` on overwrite.
    ///
    /// Ensures durable writes (fsync) and cleans up temp files on errors.
    pub async fn put_object_stream<S>(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        custom_metadata: Option<&HashMap<String, String>>,
        stream: S,
    ) -> StorageResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        self.ensure_bucket_name_safe(bucket)?;
        self.ensure_key_safe(key)?;

        let file_path = self.object_path(bucket, key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::other("object path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        let etag = format!("{:x}", digest.compute());
        let metadata_json = encode_metadata(custom_metadata);

        let insert_result = self
            .upsert_object_row(bucket, key, content_type, size_bytes, &etag, metadata_json)
            .await;

        match insert_result {
            Ok(obj) => Ok(obj),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(err)
            }
        }
    }

    /// Put an object from an in-memory buffer. Convenience wrapper over the
    /// streaming path, used for small documents like the deploy queue.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: Option<String>,
        custom_metadata: Option<&HashMap<String, String>>,
    ) -> StorageResult<StoredObject> {
        let stream = futures::stream::once(async move { Ok::<Bytes, io::Error>(bytes) });
        self.put_object_stream(bucket, key, content_type, custom_metadata, stream)
            .await
    }

    async fn upsert_object_row(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        size_bytes: i64,
        etag: &str,
        metadata_json: Option<String>,
    ) -> StorageResult<StoredObject> {
        let obj = sqlx::query_as::<_, StoredObject>(&format!(
            r#"
            INSERT INTO objects (
                id, bucket, key, content_type, size_bytes,
                etag, generation, custom_metadata, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                generation = objects.generation + 1,
                custom_metadata = excluded.custom_metadata,
                last_modified = excluded.last_modified
            RETURNING {}
            "#,
            OBJECT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(bucket)
        .bind(key)
        .bind(content_type)
        .bind(size_bytes)
        .bind(etag)
        .bind(metadata_json)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        Ok(obj)
    }

    /// Fetch an object for reading.
    ///
    /// Returns metadata and an opened File handle ready for streaming out.
    /// Returns ObjectNotFound if metadata exists but physical file is missing.
    pub async fn get_object_reader(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<(StoredObject, File)> {
        self.ensure_key_safe(key)?;
        let object = self.fetch_object(bucket, key).await?;

        let file_path = self.object_path(bucket, key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok((object, file))
    }

    /// Download the full byte content of an object.
    pub async fn download(&self, bucket: &str, key: &str) -> StorageResult<(StoredObject, Bytes)> {
        self.ensure_key_safe(key)?;
        let object = self.fetch_object(bucket, key).await?;
        let file_path = self.object_path(bucket, key);
        let bytes = fs::read(&file_path).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;
        Ok((object, Bytes::from(bytes)))
    }

    /// Fetch only object metadata.
    pub async fn get_object_metadata(&self, bucket: &str, key: &str) -> StorageResult<StoredObject> {
        self.ensure_key_safe(key)?;
        self.fetch_object(bucket, key).await
    }

    /// List objects under a prefix in lexicographical key order.
    ///
    /// Supports prefix filtering and continuation tokens; `max_keys` is
    /// clamped to one page of at most 1000 keys. Callers needing more pages
    /// pass the returned `next_page_token` back in.
    pub async fn list_objects(&self, bucket: &str, params: ListParams) -> StorageResult<ListResult> {
        self.ensure_bucket_name_safe(bucket)?;
        let max_keys = params.max_keys.clamp(1, 1000);
        let fetch_limit = max_keys + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM objects WHERE bucket = ",
            OBJECT_COLUMNS
        ));
        builder.push_bind(bucket);

        if let Some(prefix) = &params.prefix {
            builder.push(" AND key LIKE ");
            builder.push_bind(format!("{}%", prefix));
        }

        if let Some(token) = params.page_token.as_ref() {
            builder.push(" AND key > ");
            builder.push_bind(token);
        }

        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<StoredObject> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut is_truncated = false;
        let mut next_page_token = None;
        if rows.len() == fetch_limit {
            rows.pop();
            if let Some(last) = rows.last() {
                next_page_token = Some(last.key.clone());
            }
            is_truncated = true;
        }

        Ok(ListResult {
            objects: rows,
            is_truncated,
            next_page_token,
        })
    }

    /// Server-side copy of an object to another key, optionally into another
    /// bucket, without routing payload bytes through the caller.
    ///
    /// Custom metadata is replaced by `metadata_override` when given,
    /// otherwise carried over from the source. The destination is
    /// overwritten (generation bump), never versioned.
    pub async fn copy_object(
        &self,
        bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        metadata_override: Option<&HashMap<String, String>>,
    ) -> StorageResult<StoredObject> {
        self.ensure_key_safe(src_key)?;
        self.ensure_key_safe(dst_key)?;
        self.ensure_bucket_name_safe(dst_bucket)?;
        let source = self.fetch_object(bucket, src_key).await?;

        let src_path = self.object_path(bucket, src_key);
        let dst_path = self.object_path(dst_bucket, dst_key);
        let parent = dst_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::other("object path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        fs::copy(&src_path, &dst_path).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: src_key.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;

        let metadata_json = match metadata_override {
            Some(map) => encode_metadata(Some(map)),
            None => source.custom_metadata.clone(),
        };

        self.upsert_object_row(
            dst_bucket,
            dst_key,
            source.content_type.clone(),
            source.size_bytes,
            source.etag.as_deref().unwrap_or_default(),
            metadata_json,
        )
        .await
    }

    /// Delete an object's metadata row and payload.
    ///
    /// Returns the deleted record. Missing physical files are tolerated
    /// (the row is authoritative); empty shard directories are pruned.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<StoredObject> {
        self.ensure_key_safe(key)?;
        let object = self.fetch_object(bucket, key).await?;

        let result = sqlx::query("DELETE FROM objects WHERE bucket = ? AND key = ?")
            .bind(bucket)
            .bind(key)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let file_path = self.object_path(bucket, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(bucket);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }

        Ok(object)
    }

    /// Recursively remove empty directories up to bucket root.
    ///
    /// Stops when:
    /// - directory not empty
    /// - directory not found
    /// - reached root
    /// - encountered unexpected I/O errors
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

/// Serialize a metadata map to its JSON column form.
fn encode_metadata(map: Option<&HashMap<String, String>>) -> Option<String> {
    map.filter(|m| !m.is_empty())
        .and_then(|m| serde_json::to_string(m).ok())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    /// Fresh service over an in-memory SQLite database and a temp payload
    /// directory. The TempDir must stay alive for the test's duration.
    pub(crate) async fn test_service() -> (StorageService, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let sql = include_str!("../../migrations/0001_init.sql");
        for stmt in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(stmt).execute(&pool).await.unwrap();
        }
        (StorageService::new(Arc::new(pool), dir.path()), dir)
    }

    fn meta(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn put_then_download_round_trips() {
        let (svc, _dir) = test_service().await;
        let obj = svc
            .put_object(
                "drafts",
                "audio/es/cat.mp3",
                Bytes::from_static(b"meow"),
                Some("audio/mpeg".into()),
                None,
            )
            .await
            .unwrap();
        assert_eq!(obj.size_bytes, 4);
        assert_eq!(obj.generation, 1);

        let (meta, bytes) = svc.download("drafts", "audio/es/cat.mp3").await.unwrap();
        assert_eq!(&bytes[..], b"meow");
        assert_eq!(meta.content_type.as_deref(), Some("audio/mpeg"));
        assert!(meta.etag.is_some());
    }

    #[tokio::test]
    async fn overwrite_bumps_generation() {
        let (svc, _dir) = test_service().await;
        let first = svc
            .put_object("drafts", "audio/es/cat.mp3", Bytes::from_static(b"a"), None, None)
            .await
            .unwrap();
        let second = svc
            .put_object("drafts", "audio/es/cat.mp3", Bytes::from_static(b"bb"), None, None)
            .await
            .unwrap();
        assert_eq!(first.generation, 1);
        assert_eq!(second.generation, 2);
        assert_eq!(second.size_bytes, 2);
    }

    #[tokio::test]
    async fn copy_is_server_side_and_carries_metadata() {
        let (svc, _dir) = test_service().await;
        svc.put_object(
            "drafts",
            "audio/es/cat.mp3",
            Bytes::from_static(b"meow"),
            Some("audio/mpeg".into()),
            Some(&meta(&[("origin", "tts")])),
        )
        .await
        .unwrap();

        let copied = svc
            .copy_object("drafts", "audio/es/cat.mp3", "drafts", "deploy/es/cat.mp3", None)
            .await
            .unwrap();
        assert_eq!(copied.metadata().get("origin").map(String::as_str), Some("tts"));

        let overridden = svc
            .copy_object(
                "drafts",
                "audio/es/cat.mp3",
                "drafts",
                "deploy/es/cat2.mp3",
                Some(&meta(&[("approvedSource", "audio/es/cat.mp3")])),
            )
            .await
            .unwrap();
        let map = overridden.metadata();
        assert_eq!(map.get("approvedSource").map(String::as_str), Some("audio/es/cat.mp3"));
        assert!(!map.contains_key("origin"));

        let (_, bytes) = svc.download("drafts", "deploy/es/cat.mp3").await.unwrap();
        assert_eq!(&bytes[..], b"meow");
    }

    #[tokio::test]
    async fn delete_missing_object_reports_not_found() {
        let (svc, _dir) = test_service().await;
        let err = svc.delete_object("drafts", "audio/es/nope.mp3").await.unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn listing_paginates_with_prefix_and_token() {
        let (svc, _dir) = test_service().await;
        for key in [
            "audio/es/a.mp3",
            "audio/es/b.mp3",
            "audio/es/c.mp3",
            "deploy/es/a.mp3",
        ] {
            svc.put_object("drafts", key, Bytes::from_static(b"x"), None, None)
                .await
                .unwrap();
        }

        let page = svc
            .list_objects(
                "drafts",
                ListParams {
                    prefix: Some("audio/".into()),
                    page_token: None,
                    max_keys: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(page.objects.len(), 2);
        assert!(page.is_truncated);
        let token = page.next_page_token.clone().unwrap();

        let rest = svc
            .list_objects(
                "drafts",
                ListParams {
                    prefix: Some("audio/".into()),
                    page_token: Some(token),
                    max_keys: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(rest.objects.len(), 1);
        assert_eq!(rest.objects[0].key, "audio/es/c.mp3");
        assert!(!rest.is_truncated);
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let (svc, _dir) = test_service().await;
        let err = svc
            .put_object("drafts", "../escape.mp3", Bytes::from_static(b"x"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidObjectKey));
    }
}
