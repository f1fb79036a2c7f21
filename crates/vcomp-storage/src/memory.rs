//! In-process object store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use vcomp_models::PresignedRequest;

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;

/// Object store backed by a `HashMap`.
///
/// Presigned URLs use a `memory://` scheme and cannot be fetched. Call
/// [`MemoryStore::set_available`] to simulate an outage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    deleted: RwLock<Vec<String>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.objects.write().await.insert(key.into(), data.into());
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    /// Every key passed to `delete_objects`, in call order.
    pub async fn deleted_keys(&self) -> Vec<String> {
        self.deleted.read().await.clone()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::AwsSdk("memory store unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn presign(key: &str, method: &str, ttl: Duration) -> PresignedRequest {
        PresignedRequest {
            url: format!("memory://bucket/{}?expires={}", key, ttl.as_secs()),
            method: method.to_string(),
            headers: HashMap::new(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn presign_put(
        &self,
        key: &str,
        ttl: Duration,
        content_type: &str,
    ) -> StorageResult<PresignedRequest> {
        self.ensure_available()
            .map_err(|e| StorageError::presign_failed(e.to_string()))?;
        let mut req = Self::presign(key, "PUT", ttl);
        req.headers
            .insert("content-type".to_string(), content_type.to_string());
        Ok(req)
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> StorageResult<PresignedRequest> {
        self.ensure_available()
            .map_err(|e| StorageError::presign_failed(e.to_string()))?;
        Ok(Self::presign(key, "GET", ttl))
    }

    async fn download_file(&self, key: &str, path: &Path) -> StorageResult<u64> {
        self.download_range(key, path, u64::MAX).await
    }

    async fn download_range(
        &self,
        key: &str,
        path: &Path,
        max_bytes: u64,
    ) -> StorageResult<u64> {
        self.ensure_available()?;
        let data = self
            .get(key)
            .await
            .ok_or_else(|| StorageError::not_found(key))?;
        let end = data.len().min(usize::try_from(max_bytes).unwrap_or(usize::MAX));
        tokio::fs::write(path, &data[..end]).await?;
        Ok(end as u64)
    }

    async fn upload_file(&self, path: &Path, key: &str, _content_type: &str) -> StorageResult<()> {
        self.ensure_available()?;
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;
        self.insert(key, data).await;
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> StorageResult<u32> {
        self.ensure_available()
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;
        let mut objects = self.objects.write().await;
        let mut deleted = self.deleted.write().await;
        for key in keys {
            objects.remove(key);
            deleted.push(key.clone());
        }
        Ok(keys.len() as u32)
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        self.ensure_available()
    }
}
