//! Per-job compression pipeline.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use vcomp_media::{BitrateBudget, TranscodeJob, Transcoder};
use vcomp_models::{compressed_key, CompressionJobEvent, CompressionResultEvent};
use vcomp_storage::ObjectStore;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::logging::{JobLogger, JobStage};

const COMPRESSED_CONTENT_TYPE: &str = "video/mp4";

/// Download, transcode, upload and presign one job inside a scratch dir.
///
/// The pipeline never publishes; the caller turns its outcome into a
/// result event.
pub struct CompressionPipeline {
    store: Arc<dyn ObjectStore>,
    transcoder: Arc<dyn Transcoder>,
    budget: BitrateBudget,
    download_url_ttl: Duration,
}

impl CompressionPipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        transcoder: Arc<dyn Transcoder>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            store,
            transcoder,
            budget: config.budget,
            download_url_ttl: config.download_url_ttl,
        }
    }

    pub async fn compress(
        &self,
        job: &CompressionJobEvent,
        duration_secs: f64,
        scratch: &Path,
        logger: &JobLogger,
    ) -> WorkerResult<CompressionResultEvent> {
        let bitrates = self.budget.bitrates(duration_secs)?;

        let source = scratch.join("source");
        self.store.download_file(&job.object_key, &source).await?;
        logger.advance(JobStage::Downloaded);

        let transcode = TranscodeJob::in_scratch(scratch, source, bitrates);
        self.transcoder.first_pass(&transcode).await?;
        logger.advance(JobStage::Pass1);
        self.transcoder.second_pass(&transcode).await?;
        logger.advance(JobStage::Pass2);

        let compressed = compressed_key(&job.object_key);
        self.store
            .upload_file(&transcode.output, &compressed, COMPRESSED_CONTENT_TYPE)
            .await?;
        logger.advance(JobStage::Uploaded);

        let download = self
            .store
            .presign_get(&compressed, self.download_url_ttl)
            .await?;

        Ok(CompressionResultEvent::success(
            job.job_id,
            job.object_key.clone(),
            compressed,
            download,
            expiry_after(self.download_url_ttl),
        ))
    }
}

fn expiry_after(ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| Utc::now().checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_is_now_plus_ttl() {
        let before = Utc::now();
        let expiry = expiry_after(Duration::from_secs(120));
        let delta = expiry - before;
        assert!(delta >= chrono::Duration::seconds(120));
        assert!(delta < chrono::Duration::seconds(125));
    }
}
