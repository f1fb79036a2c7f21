//! Upload URLs, metadata extraction, thumbnails and job start.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tempfile::TempDir;
use tracing::{info, warn};

use vcomp_media::{Prober, Thumbnailer};
use vcomp_models::{
    derive_job_id, derive_object_key, thumbnail_key, CompressionJobEvent, JobId, Metadata,
    PresignedRequest,
};
use vcomp_queue::EventPublisher;
use vcomp_storage::ObjectStore;

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};

const UPLOAD_CONTENT_TYPE: &str = "video/mp4";
const THUMBNAIL_CONTENT_TYPE: &str = "image/jpeg";

/// A presigned upload slot for one file.
#[derive(Debug, Clone, Serialize)]
pub struct UploadTicket {
    pub job_id: JobId,
    pub presigned_put_url: PresignedRequest,
    pub object_key: String,
}

/// Front half of the pipeline: everything that happens before the worker.
pub struct MetadataService {
    store: Arc<dyn ObjectStore>,
    publisher: EventPublisher,
    prober: Arc<dyn Prober>,
    thumbnailer: Arc<dyn Thumbnailer>,
    scratch_dir: PathBuf,
    upload_url_ttl: Duration,
    thumbnail_url_ttl: Duration,
    thumbnail_range_bytes: u64,
}

impl MetadataService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        publisher: EventPublisher,
        prober: Arc<dyn Prober>,
        thumbnailer: Arc<dyn Thumbnailer>,
        config: &ApiConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            prober,
            thumbnailer,
            scratch_dir: config.scratch_dir.clone(),
            upload_url_ttl: config.upload_url_ttl,
            thumbnail_url_ttl: config.thumbnail_url_ttl,
            thumbnail_range_bytes: config.thumbnail_range_bytes,
        }
    }

    /// Derive a fresh job id and object key for `filename` and presign a PUT for it.
    pub async fn issue_upload_url(&self, filename: &str) -> ApiResult<UploadTicket> {
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(ApiError::validation("filename must not be empty"));
        }

        let job_id = derive_job_id(filename);
        let object_key = derive_object_key(filename);

        let presigned_put_url = self
            .store
            .presign_put(&object_key, self.upload_url_ttl, UPLOAD_CONTENT_TYPE)
            .await
            .map_err(|e| ApiError::storage_unavailable(e.to_string()))?;

        info!(job_id = %job_id, object_key = %object_key, "Issued upload URL");

        Ok(UploadTicket {
            job_id,
            presigned_put_url,
            object_key,
        })
    }

    /// Download the object into scratch and probe it.
    pub async fn extract_metadata(&self, object_key: &str) -> ApiResult<Metadata> {
        let scratch = self.scratch("probe-").await?;
        let source = scratch.path().join("source");

        self.store.download_file(object_key, &source).await?;
        let metadata = self.prober.probe(&source).await?;

        info!(
            object_key,
            duration = %metadata.duration,
            format = %metadata.format_name,
            "Extracted metadata"
        );
        Ok(metadata)
    }

    /// Render a frame from the head of the object and presign a GET for it.
    pub async fn extract_thumbnail(&self, object_key: &str) -> ApiResult<PresignedRequest> {
        let scratch = self.scratch("thumb-").await?;
        let source = scratch.path().join("source");
        let frame = scratch.path().join("thumb.jpg");

        self.store
            .download_range(object_key, &source, self.thumbnail_range_bytes)
            .await?;
        self.thumbnailer.thumbnail(&source, &frame).await?;

        let key = thumbnail_key(object_key);
        self.store
            .upload_file(&frame, &key, THUMBNAIL_CONTENT_TYPE)
            .await?;
        let url = self.store.presign_get(&key, self.thumbnail_url_ttl).await?;

        info!(object_key, thumbnail_key = %key, "Extracted thumbnail");
        Ok(url)
    }

    /// Publish a compression job. Returns once the event is appended.
    pub async fn start_compression_job(
        &self,
        job_id: JobId,
        object_key: &str,
        metadata: Metadata,
    ) -> ApiResult<()> {
        if let Err(e) = metadata.duration_secs() {
            warn!(job_id = %job_id, object_key, "Rejecting job: {}", e);
            return Err(ApiError::validation(e.to_string()));
        }

        let event = CompressionJobEvent {
            job_id,
            object_key: object_key.to_string(),
            metadata,
        };
        self.publisher.publish_job(event).await?;
        Ok(())
    }

    async fn scratch(&self, prefix: &str) -> ApiResult<TempDir> {
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| ApiError::internal(format!("scratch dir: {}", e)))?;
        tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(&self.scratch_dir)
            .map_err(|e| ApiError::internal(format!("scratch dir: {}", e)))
    }
}
