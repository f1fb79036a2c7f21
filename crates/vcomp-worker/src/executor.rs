//! Job-topic consumer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use vcomp_media::Transcoder;
use vcomp_models::{compressed_key, CompressionJobEvent, CompressionResultEvent, JobId, ResultEventType};
use vcomp_queue::{
    BrokerConfig, EventLog, EventPublisher, FailureTracker, PipelineEvent, StartFrom,
    StreamRecord, Subscription,
};
use vcomp_storage::ObjectStore;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::{JobLogger, JobStage};
use crate::pipeline::CompressionPipeline;

const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// What happened to one record from the job topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// A result event was produced (and published, unless `published` is false)
    Completed {
        job_id: JobId,
        result: ResultEventType,
        published: bool,
    },
    /// Not a valid compression job; nothing published
    Skipped(String),
    /// Shutdown interrupted the job; scratch removed, nothing published
    Cancelled(JobId),
}

/// Consumes compression jobs one at a time and publishes their results.
pub struct CompressionWorker {
    config: WorkerConfig,
    log: Arc<dyn EventLog>,
    store: Arc<dyn ObjectStore>,
    job_topic: String,
    read_block: Duration,
    publisher: EventPublisher,
    pipeline: CompressionPipeline,
}

impl CompressionWorker {
    pub fn new(
        config: WorkerConfig,
        broker: &BrokerConfig,
        log: Arc<dyn EventLog>,
        store: Arc<dyn ObjectStore>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let pipeline = CompressionPipeline::new(store.clone(), transcoder, &config);
        Self {
            store,
            publisher: EventPublisher::new(log.clone(), broker),
            job_topic: broker.job_topic.clone(),
            read_block: broker.read_block,
            log,
            pipeline,
            config,
        }
    }

    /// Fail fast when the broker or the object store cannot be reached.
    pub async fn check_dependencies(&self) -> anyhow::Result<()> {
        self.log.ping().await.context("broker unreachable")?;
        self.store
            .check_connectivity()
            .await
            .context("storage unreachable")?;
        Ok(())
    }

    /// Consume from the newest offset until `shutdown` turns true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
        tokio::fs::create_dir_all(&self.config.work_dir).await?;

        let mut subscription = Subscription::open(
            self.log.clone(),
            self.job_topic.clone(),
            StartFrom::Latest,
            self.read_block,
            1,
        )
        .await?;

        info!(
            topic = %self.job_topic,
            cursor = %subscription.cursor(),
            "Compression worker consuming"
        );

        let mut read_failures = FailureTracker::new(3);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let batch = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                batch = subscription.next_batch() => batch,
            };

            let records = match batch {
                Ok(records) => {
                    read_failures.record_success();
                    records
                }
                Err(e) => {
                    if read_failures.record_failure() {
                        error!(
                            failures = read_failures.failure_count(),
                            "Error reading job topic: {}",
                            e
                        );
                    }
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(READ_ERROR_BACKOFF) => {}
                    }
                    continue;
                }
            };

            for record in records {
                let outcome = self.handle_record(&record, &shutdown).await;
                debug!(id = %record.id, "Record outcome: {:?}", outcome);
                if matches!(outcome, JobOutcome::Cancelled(_)) {
                    break;
                }
            }
        }

        info!("Compression worker stopped");
        Ok(())
    }

    /// Validate and process one record.
    pub async fn handle_record(
        &self,
        record: &StreamRecord,
        shutdown: &watch::Receiver<bool>,
    ) -> JobOutcome {
        let event = match PipelineEvent::from_payload(&record.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(id = %record.id, key = %record.key, "Skipping malformed record: {}", e);
                return JobOutcome::Skipped(format!("malformed record: {}", e));
            }
        };

        let job = match event {
            PipelineEvent::CompressionJob(job) => job,
            other => {
                warn!(id = %record.id, "Skipping {} record on job topic", other.kind());
                return JobOutcome::Skipped(format!("unexpected {} record", other.kind()));
            }
        };

        let logger = JobLogger::new(&job.job_id, "compression");
        logger.log_start(&job.object_key);

        let duration = match job.metadata.duration_secs() {
            Ok(d) => d,
            Err(e) => {
                logger.log_warning(&format!("skipping job: {}", e));
                return JobOutcome::Skipped(e.to_string());
            }
        };
        logger.advance(JobStage::Validated);

        self.process(job, duration, &logger, shutdown.clone()).await
    }

    async fn process(
        &self,
        job: CompressionJobEvent,
        duration: f64,
        logger: &JobLogger,
        shutdown: watch::Receiver<bool>,
    ) -> JobOutcome {
        let scratch = tempfile::Builder::new()
            .prefix("job-")
            .tempdir_in(&self.config.work_dir);

        let result = match &scratch {
            Ok(dir) => {
                let work = self.pipeline.compress(&job, duration, dir.path(), logger);
                tokio::select! {
                    r = tokio::time::timeout(self.config.job_timeout, work) => {
                        r.unwrap_or(Err(WorkerError::Timeout(self.config.job_timeout)))
                    }
                    _ = shutdown_requested(shutdown) => Err(WorkerError::Cancelled),
                }
            }
            Err(e) => Err(WorkerError::Io(std::io::Error::new(e.kind(), e.to_string()))),
        };

        if matches!(result, Err(WorkerError::Cancelled)) {
            logger.log_warning("interrupted by shutdown");
            drop(scratch);
            logger.advance(JobStage::Cleaned);
            return JobOutcome::Cancelled(job.job_id);
        }

        let event = result.unwrap_or_else(|e| {
            logger.log_error(&e.to_string());
            CompressionResultEvent::failure(job.job_id, job.object_key.clone(), compressed_key(&job.object_key))
        });
        let result_type = event.event_type;

        let published = match self.publisher.publish_result(event).await {
            Ok(_) => {
                logger.advance(JobStage::Published);
                true
            }
            Err(e) => {
                logger.log_error(&format!("failed to publish result: {}", e));
                false
            }
        };

        if let Ok(dir) = scratch {
            if let Err(e) = dir.close() {
                logger.log_warning(&format!("failed to remove scratch: {}", e));
            }
        }
        logger.advance(JobStage::Cleaned);
        logger.log_completion(result_type.as_str());

        JobOutcome::Completed {
            job_id: job.job_id,
            result: result_type,
            published,
        }
    }
}

async fn shutdown_requested(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio_test::assert_ok;
    use vcomp_media::{MediaError, MediaResult, TranscodeJob};
    use vcomp_models::Metadata;
    use vcomp_queue::MemoryEventLog;
    use vcomp_storage::MemoryStore;

    const RESULT_TOPIC: &str = "vcomp:compression-result";

    #[derive(Default)]
    struct FakeTranscoder {
        fail_pass: Option<u8>,
        delay: Duration,
        passes: Mutex<Vec<u8>>,
    }

    impl FakeTranscoder {
        fn run(&self, pass: u8) -> MediaResult<()> {
            self.passes.lock().unwrap().push(pass);
            if self.fail_pass == Some(pass) {
                return Err(MediaError::ffmpeg_failed("exit 1", None, Some(1)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        async fn first_pass(&self, job: &TranscodeJob) -> MediaResult<()> {
            tokio::time::sleep(self.delay).await;
            assert!(job.input.exists());
            self.run(1)
        }

        async fn second_pass(&self, job: &TranscodeJob) -> MediaResult<()> {
            self.run(2)?;
            tokio::fs::write(&job.output, b"compressed").await?;
            Ok(())
        }
    }

    struct Harness {
        worker: CompressionWorker,
        log: Arc<MemoryEventLog>,
        store: Arc<MemoryStore>,
        transcoder: Arc<FakeTranscoder>,
        work_dir: tempfile::TempDir,
    }

    async fn harness(transcoder: FakeTranscoder, config: WorkerConfig) -> Harness {
        let work_dir = tempfile::tempdir().unwrap();
        let log = Arc::new(MemoryEventLog::new());
        let store = Arc::new(MemoryStore::new());
        store.insert("clip.mp4_1", b"source-bytes".to_vec()).await;
        let transcoder = Arc::new(transcoder);

        let broker = BrokerConfig {
            read_block: Duration::from_millis(50),
            ..BrokerConfig::default()
        };
        let config = WorkerConfig {
            work_dir: work_dir.path().to_path_buf(),
            ..config
        };
        let worker = CompressionWorker::new(
            config,
            &broker,
            log.clone(),
            store.clone(),
            transcoder.clone(),
        );

        Harness {
            worker,
            log,
            store,
            transcoder,
            work_dir,
        }
    }

    fn job_record(job_id: i64, object_key: &str, duration: &str) -> StreamRecord {
        let event = PipelineEvent::CompressionJob(CompressionJobEvent {
            job_id: JobId(job_id),
            object_key: object_key.to_string(),
            metadata: Metadata {
                duration: duration.to_string(),
                ..Default::default()
            },
        });
        StreamRecord {
            id: "1-0".to_string(),
            key: job_id.to_string(),
            payload: event.to_payload().unwrap(),
        }
    }

    fn results(log: &MemoryEventLog) -> Vec<CompressionResultEvent> {
        log.records(RESULT_TOPIC)
            .iter()
            .map(|r| match PipelineEvent::from_payload(&r.payload).unwrap() {
                PipelineEvent::CompressionResult(e) => e,
                other => panic!("unexpected {:?}", other),
            })
            .collect()
    }

    fn scratch_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().count() == 0
    }

    fn no_shutdown() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        std::mem::forget(tx);
        rx
    }

    #[tokio::test]
    async fn test_success_publishes_one_result() {
        let h = harness(FakeTranscoder::default(), WorkerConfig::default()).await;

        let outcome = h
            .worker
            .handle_record(&job_record(7, "clip.mp4_1", "218.15"), &no_shutdown())
            .await;

        assert_eq!(
            outcome,
            JobOutcome::Completed {
                job_id: JobId(7),
                result: ResultEventType::Success,
                published: true
            }
        );
        let results = results(&h.log);
        assert_eq!(results.len(), 1);
        assert!(results[0].is_success());
        assert_eq!(results[0].compressed_key, "clip.mp4_1_compressed");
        assert!(results[0].presigned_download_url.is_some());
        assert!(results[0].expiry.is_some());
        assert_eq!(
            h.log.records(RESULT_TOPIC)[0].key,
            "7",
            "results are keyed by job id"
        );
        assert_eq!(
            h.store.get("clip.mp4_1_compressed").await.unwrap(),
            b"compressed"
        );
        assert_eq!(*h.transcoder.passes.lock().unwrap(), vec![1, 2]);
        assert!(scratch_is_empty(h.work_dir.path()));
    }

    #[tokio::test]
    async fn test_transcode_failure_publishes_fail() {
        let transcoder = FakeTranscoder {
            fail_pass: Some(2),
            ..Default::default()
        };
        let h = harness(transcoder, WorkerConfig::default()).await;

        let outcome = h
            .worker
            .handle_record(&job_record(8, "clip.mp4_1", "30"), &no_shutdown())
            .await;

        assert!(matches!(
            outcome,
            JobOutcome::Completed {
                result: ResultEventType::Fail,
                ..
            }
        ));
        let results = results(&h.log);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].event_type, ResultEventType::Fail);
        assert!(results[0].presigned_download_url.is_none());
        assert!(results[0].expiry.is_none());
        assert!(!h.store.contains("clip.mp4_1_compressed").await);
        assert!(scratch_is_empty(h.work_dir.path()));
    }

    #[tokio::test]
    async fn test_missing_source_publishes_fail() {
        let h = harness(FakeTranscoder::default(), WorkerConfig::default()).await;

        h.worker
            .handle_record(&job_record(9, "missing.mp4_1", "30"), &no_shutdown())
            .await;

        let results = results(&h.log);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].event_type, ResultEventType::Fail);
        assert!(h.transcoder.passes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_records_are_skipped() {
        let h = harness(FakeTranscoder::default(), WorkerConfig::default()).await;
        let foreign = StreamRecord {
            id: "2-0".to_string(),
            key: "1".to_string(),
            payload: PipelineEvent::CompressionResult(CompressionResultEvent::failure(
                JobId(1),
                "a",
                "a_compressed",
            ))
            .to_payload()
            .unwrap(),
        };
        let garbage = StreamRecord {
            id: "3-0".to_string(),
            key: String::new(),
            payload: "{not json".to_string(),
        };

        for record in [
            foreign,
            garbage,
            job_record(1, "clip.mp4_1", "abc"),
            job_record(2, "clip.mp4_1", "0"),
            job_record(3, "clip.mp4_1", ""),
        ] {
            let outcome = h.worker.handle_record(&record, &no_shutdown()).await;
            assert!(matches!(outcome, JobOutcome::Skipped(_)), "{:?}", outcome);
        }
        assert!(results(&h.log).is_empty());
    }

    #[tokio::test]
    async fn test_job_timeout_publishes_fail() {
        let transcoder = FakeTranscoder {
            delay: Duration::from_secs(30),
            ..Default::default()
        };
        let config = WorkerConfig {
            job_timeout: Duration::from_millis(100),
            ..WorkerConfig::default()
        };
        let h = harness(transcoder, config).await;

        h.worker
            .handle_record(&job_record(10, "clip.mp4_1", "30"), &no_shutdown())
            .await;

        let results = results(&h.log);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].event_type, ResultEventType::Fail);
        assert!(scratch_is_empty(h.work_dir.path()));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_without_result() {
        let transcoder = FakeTranscoder {
            delay: Duration::from_secs(30),
            ..Default::default()
        };
        let h = harness(transcoder, WorkerConfig::default()).await;
        let (tx, rx) = watch::channel(false);

        let record = job_record(11, "clip.mp4_1", "30");
        let (outcome, _) = tokio::join!(h.worker.handle_record(&record, &rx), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        });

        assert_eq!(outcome, JobOutcome::Cancelled(JobId(11)));
        assert!(results(&h.log).is_empty());
        assert!(scratch_is_empty(h.work_dir.path()));
    }

    #[tokio::test]
    async fn test_run_ignores_backlog_and_stops_on_shutdown() {
        let h = harness(FakeTranscoder::default(), WorkerConfig::default()).await;
        let old = job_record(20, "clip.mp4_1", "30");
        h.log
            .append("vcomp:compression-job", &old.key, &old.payload)
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let log = h.log.clone();
        let fresh = job_record(21, "clip.mp4_1", "30");

        let (run_result, _) = tokio::join!(h.worker.run(rx), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            log.append("vcomp:compression-job", &fresh.key, &fresh.payload)
                .await
                .unwrap();
            for _ in 0..100 {
                if !log.records(RESULT_TOPIC).is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            tx.send(true).unwrap();
        });

        assert_ok!(run_result);
        let results = results(&h.log);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].job_id, JobId(21));
    }

    #[tokio::test]
    async fn test_check_dependencies_reports_unreachable() {
        let h = harness(FakeTranscoder::default(), WorkerConfig::default()).await;
        assert_ok!(h.worker.check_dependencies().await);

        h.log.set_reads_failing(true);
        let err = h.worker.check_dependencies().await.unwrap_err();
        assert_eq!(err.to_string(), "broker unreachable");

        h.log.set_reads_failing(false);
        h.store.set_available(false);
        let err = h.worker.check_dependencies().await.unwrap_err();
        assert_eq!(err.to_string(), "storage unreachable");
    }
}
