//! The object store interface.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use vcomp_models::PresignedRequest;

use crate::error::StorageResult;

/// Operations the pipeline needs from an object store.
///
/// Implementations must map a missing object to
/// [`StorageError::NotFound`](crate::StorageError::NotFound).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Presigned PUT for `key`, valid for `ttl`. The uploader must send
    /// the returned headers, including `content-type`.
    async fn presign_put(
        &self,
        key: &str,
        ttl: Duration,
        content_type: &str,
    ) -> StorageResult<PresignedRequest>;

    /// Presigned GET for `key`, valid for `ttl`.
    async fn presign_get(&self, key: &str, ttl: Duration) -> StorageResult<PresignedRequest>;

    /// Download the whole object into `path`. Returns the number of bytes written.
    async fn download_file(&self, key: &str, path: &Path) -> StorageResult<u64>;

    /// Download at most the first `max_bytes` of the object into `path`.
    async fn download_range(&self, key: &str, path: &Path, max_bytes: u64)
        -> StorageResult<u64>;

    /// Upload the file at `path` as `key`.
    async fn upload_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()>;

    /// Batch delete. Returns the number of keys submitted.
    async fn delete_objects(&self, keys: &[String]) -> StorageResult<u32>;

    /// Cheap round trip used by readiness checks.
    async fn check_connectivity(&self) -> StorageResult<()>;
}
