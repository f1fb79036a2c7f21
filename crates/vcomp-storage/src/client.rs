//! R2 client implementation.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::presigning::{PresignedRequest as AwsPresignedRequest, PresigningConfig};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use tracing::{debug, info};
use vcomp_models::PresignedRequest;

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;

/// Configuration for R2 client.
#[derive(Debug, Clone)]
pub struct R2Config {
    /// R2 endpoint URL (S3 API endpoint)
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Region (usually "auto" for R2)
    pub region: String,
}

impl R2Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("R2_ENDPOINT_URL")
                .map_err(|_| StorageError::config_error("R2_ENDPOINT_URL not set"))?,
            access_key_id: std::env::var("R2_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("R2_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("R2_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("R2_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("R2_BUCKET_NAME")
                .map_err(|_| StorageError::config_error("R2_BUCKET_NAME not set"))?,
            region: std::env::var("R2_REGION").unwrap_or_else(|_| "auto".to_string()),
        })
    }
}

/// Cloudflare R2 storage client.
#[derive(Clone)]
pub struct R2Client {
    client: Client,
    bucket: String,
}

impl R2Client {
    /// Create a new R2 client from configuration.
    pub fn new(config: R2Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "r2",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn get_object(&self, key: &str, range: Option<String>) -> StorageResult<Vec<u8>> {
        let mut request = self.client.get_object().bucket(&self.bucket).key(key);
        if let Some(r) = range {
            request = request.range(r);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_get_error(key, e))?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::download_failed(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(bytes)
    }
}

fn map_get_error(key: &str, e: SdkError<GetObjectError>) -> StorageError {
    let missing = matches!(e.as_service_error(), Some(se) if se.is_no_such_key())
        || e.to_string().contains("NoSuchKey");
    if missing {
        StorageError::not_found(key)
    } else {
        StorageError::download_failed(e.to_string())
    }
}

fn to_presigned(req: AwsPresignedRequest) -> PresignedRequest {
    PresignedRequest {
        url: req.uri().to_string(),
        method: req.method().to_string(),
        headers: req
            .headers()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

async fn write_scratch(path: &Path, bytes: &[u8]) -> StorageResult<u64> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            StorageError::download_failed(format!("Failed to create directory: {}", e))
        })?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| StorageError::download_failed(format!("Failed to write file: {}", e)))?;
    Ok(bytes.len() as u64)
}

#[async_trait]
impl ObjectStore for R2Client {
    async fn presign_put(
        &self,
        key: &str,
        ttl: Duration,
        content_type: &str,
    ) -> StorageResult<PresignedRequest> {
        let presign_config = PresigningConfig::expires_in(ttl)
            .map_err(|e| StorageError::presign_failed(e.to_string()))?;

        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::presign_failed(e.to_string()))?;

        Ok(to_presigned(presigned))
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> StorageResult<PresignedRequest> {
        let presign_config = PresigningConfig::expires_in(ttl)
            .map_err(|e| StorageError::presign_failed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::presign_failed(e.to_string()))?;

        Ok(to_presigned(presigned))
    }

    async fn download_file(&self, key: &str, path: &Path) -> StorageResult<u64> {
        debug!("Downloading {} to {}", key, path.display());

        let bytes = self.get_object(key, None).await?;
        let written = write_scratch(path, &bytes).await?;

        info!("Downloaded {} to {} ({} bytes)", key, path.display(), written);
        Ok(written)
    }

    async fn download_range(
        &self,
        key: &str,
        path: &Path,
        max_bytes: u64,
    ) -> StorageResult<u64> {
        if max_bytes == 0 {
            return Err(StorageError::download_failed("empty byte range"));
        }
        let range = format!("bytes=0-{}", max_bytes - 1);
        debug!("Downloading {} ({}) to {}", key, range, path.display());

        let bytes = self.get_object(key, Some(range)).await?;
        write_scratch(path, &bytes).await
    }

    async fn upload_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()> {
        debug!("Uploading {} to {}", path.display(), key);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!("Uploaded {} to {}", path.display(), key);
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> StorageResult<u32> {
        if keys.is_empty() {
            return Ok(0);
        }

        debug!("Deleting {} objects", keys.len());

        let objects = keys
            .iter()
            .map(|k| {
                ObjectIdentifier::builder()
                    .key(k)
                    .build()
                    .map_err(|e| StorageError::delete_failed(e.to_string()))
            })
            .collect::<StorageResult<Vec<_>>>()?;

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        self.client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        info!("Deleted {} objects", keys.len());
        Ok(keys.len() as u32)
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("R2 connectivity check failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> R2Config {
        R2Config {
            endpoint_url: "https://account.r2.cloudflarestorage.com".to_string(),
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            bucket_name: "videos".to_string(),
            region: "auto".to_string(),
        }
    }

    #[tokio::test]
    async fn test_presign_put_is_offline_and_signed() {
        let client = R2Client::new(config());
        let req = client
            .presign_put("clip.mp4_1", Duration::from_secs(360), "video/mp4")
            .await
            .unwrap();

        assert_eq!(req.method, "PUT");
        assert!(req.url.contains("/videos/clip.mp4_1"));
        assert!(req.url.contains("X-Amz-Expires=360"));
        assert!(req.url.contains("X-Amz-Signature="));
    }

    #[tokio::test]
    async fn test_presign_get_method() {
        let client = R2Client::new(config());
        let req = client
            .presign_get("clip.mp4_1_compressed", Duration::from_secs(120))
            .await
            .unwrap();

        assert_eq!(req.method, "GET");
        assert!(req.url.contains("X-Amz-Expires=120"));
    }

    #[tokio::test]
    async fn test_download_range_rejects_zero() {
        let client = R2Client::new(config());
        let dir = tempfile::tempdir().unwrap();
        let err = client
            .download_range("k", &dir.path().join("out"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DownloadFailed(_)));
    }
}
