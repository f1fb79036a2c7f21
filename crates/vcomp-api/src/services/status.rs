//! Job status resolver.
//!
//! One consumer replays both topics from the beginning into an in-memory
//! index keyed by job id, then keeps following them. Pollers look up the
//! index and wait on change notifications until their timeout; they never
//! read the broker themselves.
//!
//! Jobs whose publication was seen but whose result never arrived are
//! reported stale after a configurable age, so callers stop waiting on a
//! job whose worker died.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

use vcomp_models::{CompressionResultEvent, JobId};
use vcomp_queue::{
    BrokerConfig, EventLog, FailureTracker, PipelineEvent, QueueResult, StartFrom, StreamRecord,
    Subscription,
};

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};

/// Interval between retention sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Pause after a failed broker read.
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Stream ids below this are sequence numbers, not unix milliseconds.
const MIN_TIMESTAMP_ID_MS: i64 = 1_000_000_000_000;

/// Answer to a status poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The worker published a terminal result
    Done(CompressionResultEvent),
    /// No result yet
    Processing,
    /// Published long ago and still no result
    Stale,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    published_at: Option<DateTime<Utc>>,
    result: Option<CompressionResultEvent>,
    updated_at: DateTime<Utc>,
}

impl IndexEntry {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            published_at: None,
            result: None,
            updated_at: at,
        }
    }
}

pub struct JobStatusResolver {
    log: Arc<dyn EventLog>,
    job_topic: String,
    result_topic: String,
    read_block: Duration,
    read_batch: usize,
    stale_after: chrono::Duration,
    retention: chrono::Duration,
    index: RwLock<HashMap<JobId, IndexEntry>>,
    changes: watch::Sender<u64>,
    healthy: AtomicBool,
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// Time a record was appended: the millisecond prefix of a Redis stream id,
/// or now for ids that are plain sequence numbers.
fn record_time(id: &str) -> DateTime<Utc> {
    id.split('-')
        .next()
        .and_then(|ms| ms.parse::<i64>().ok())
        .filter(|ms| *ms >= MIN_TIMESTAMP_ID_MS)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

impl JobStatusResolver {
    pub fn new(log: Arc<dyn EventLog>, broker: &BrokerConfig, config: &ApiConfig) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            log,
            job_topic: broker.job_topic.clone(),
            result_topic: broker.result_topic.clone(),
            read_block: broker.read_block,
            read_batch: broker.read_batch,
            stale_after: to_chrono(config.stale_job_after),
            retention: to_chrono(config.result_retention),
            index: RwLock::new(HashMap::new()),
            changes,
            healthy: AtomicBool::new(true),
        }
    }

    /// Whether the index consumer is currently reading the broker.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub async fn indexed_jobs(&self) -> usize {
        self.index.read().await.len()
    }

    /// Wait up to `timeout` for a terminal result for `job_id`.
    ///
    /// Elapsing without a result is not an error. An unreachable broker is.
    pub async fn poll(&self, job_id: JobId, timeout: Duration) -> ApiResult<PollOutcome> {
        let deadline = Instant::now() + timeout;
        // Subscribe before the first lookup so no insertion is missed.
        let mut changes = self.changes.subscribe();

        loop {
            if let Some(outcome) = self.lookup(job_id).await {
                return Ok(outcome);
            }
            if !self.is_healthy() {
                return Err(ApiError::internal("status channel unreachable"));
            }

            match tokio::time::timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => break,
            }
        }

        if !self.is_healthy() {
            return Err(ApiError::internal("status channel unreachable"));
        }
        Ok(self.pending_outcome(job_id, Utc::now()).await)
    }

    async fn lookup(&self, job_id: JobId) -> Option<PollOutcome> {
        let index = self.index.read().await;
        index
            .get(&job_id)
            .and_then(|entry| entry.result.clone())
            .map(PollOutcome::Done)
    }

    async fn pending_outcome(&self, job_id: JobId, now: DateTime<Utc>) -> PollOutcome {
        let index = self.index.read().await;
        match index.get(&job_id).and_then(|e| e.published_at) {
            Some(published_at) if now - published_at >= self.stale_after => PollOutcome::Stale,
            _ => PollOutcome::Processing,
        }
    }

    /// Fold one record from either topic into the index.
    pub async fn apply(&self, record: &StreamRecord) {
        let event = match PipelineEvent::from_payload(&record.payload) {
            Ok(event) => event,
            Err(e) => {
                debug!(id = %record.id, "Ignoring undecodable record: {}", e);
                return;
            }
        };
        let at = record_time(&record.id);

        let mut index = self.index.write().await;
        match event {
            PipelineEvent::CompressionJob(job) => {
                let entry = index
                    .entry(job.job_id)
                    .or_insert_with(|| IndexEntry::new(at));
                entry.published_at = Some(at);
                entry.updated_at = entry.updated_at.max(at);
            }
            PipelineEvent::CompressionResult(result) => {
                let entry = index
                    .entry(result.job_id)
                    .or_insert_with(|| IndexEntry::new(at));
                entry.updated_at = entry.updated_at.max(at);
                entry.result = Some(result);
                drop(index);
                self.changes.send_modify(|version| *version += 1);
            }
        }
    }

    /// Drop entries untouched for longer than the retention window.
    pub async fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let mut index = self.index.write().await;
        let before = index.len();
        index.retain(|_, entry| now - entry.updated_at < self.retention);
        before - index.len()
    }

    /// Follow both topics until `shutdown` turns true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let (mut jobs, mut results) = match self.open(&mut shutdown).await {
            Some(subscriptions) => subscriptions,
            None => return,
        };
        info!(
            jobs = %jobs.topic(),
            results = %results.topic(),
            "Job status index following topics"
        );

        let mut sweep = interval(SWEEP_INTERVAL);
        let mut failures = FailureTracker::new(3);

        loop {
            let batch = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = sweep.tick() => {
                    let evicted = self.evict_expired(Utc::now()).await;
                    if evicted > 0 {
                        let remaining = self.indexed_jobs().await;
                        info!(
                            remaining = remaining,
                            "Evicted {} job status entries",
                            evicted
                        );
                    }
                    continue;
                }
                batch = results.next_batch() => batch,
                batch = jobs.next_batch() => batch,
            };

            match batch {
                Ok(records) => {
                    failures.record_success();
                    self.healthy.store(true, Ordering::SeqCst);
                    for record in &records {
                        self.apply(record).await;
                    }
                }
                Err(e) => {
                    self.healthy.store(false, Ordering::SeqCst);
                    if failures.record_failure() {
                        error!("Job status index read failed: {}", e);
                    }
                    tokio::time::sleep(READ_ERROR_BACKOFF).await;
                }
            }
        }

        info!("Job status index stopped");
    }

    async fn open(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<(Subscription, Subscription)> {
        let mut failures = FailureTracker::new(3);
        loop {
            match self.subscribe().await {
                Ok(subscriptions) => {
                    self.healthy.store(true, Ordering::SeqCst);
                    return Some(subscriptions);
                }
                Err(e) => {
                    self.healthy.store(false, Ordering::SeqCst);
                    if failures.record_failure() {
                        warn!("Cannot open status topics: {}", e);
                    }
                }
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return None;
                    }
                }
                _ = tokio::time::sleep(READ_ERROR_BACKOFF) => {}
            }
        }
    }

    async fn subscribe(&self) -> QueueResult<(Subscription, Subscription)> {
        let jobs = Subscription::open(
            self.log.clone(),
            self.job_topic.clone(),
            StartFrom::Earliest,
            self.read_block,
            self.read_batch,
        )
        .await?;
        let results = Subscription::open(
            self.log.clone(),
            self.result_topic.clone(),
            StartFrom::Earliest,
            self.read_block,
            self.read_batch,
        )
        .await?;
        Ok((jobs, results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcomp_models::{CompressionJobEvent, Metadata, PresignedRequest, ResultEventType};
    use vcomp_queue::{EventPublisher, MemoryEventLog};

    fn broker() -> BrokerConfig {
        BrokerConfig {
            read_block: Duration::from_millis(50),
            ..BrokerConfig::default()
        }
    }

    fn success(id: i64) -> CompressionResultEvent {
        CompressionResultEvent::success(
            JobId(id),
            "a.mp4_1",
            "a.mp4_1_compressed",
            PresignedRequest {
                url: "memory://bucket/a.mp4_1_compressed".to_string(),
                method: "GET".to_string(),
                headers: Default::default(),
            },
            Utc::now(),
        )
    }

    fn job(id: i64) -> CompressionJobEvent {
        CompressionJobEvent {
            job_id: JobId(id),
            object_key: "a.mp4_1".to_string(),
            metadata: Metadata {
                duration: "10".to_string(),
                ..Default::default()
            },
        }
    }

    struct Running {
        resolver: Arc<JobStatusResolver>,
        publisher: EventPublisher,
        log: Arc<MemoryEventLog>,
        stop: watch::Sender<bool>,
        handle: tokio::task::JoinHandle<()>,
    }

    impl Running {
        async fn stop(self) {
            self.stop.send(true).unwrap();
            self.handle.await.unwrap();
        }
    }

    fn start(log: Arc<MemoryEventLog>, config: ApiConfig) -> Running {
        let broker = broker();
        let resolver = Arc::new(JobStatusResolver::new(log.clone(), &broker, &config));
        let (stop, rx) = watch::channel(false);
        let runner = resolver.clone();
        let handle = tokio::spawn(async move { runner.run(rx).await });
        Running {
            resolver,
            publisher: EventPublisher::new(log.clone(), &broker),
            log,
            stop,
            handle,
        }
    }

    #[tokio::test]
    async fn test_poll_without_result_is_processing() {
        let r = start(Arc::new(MemoryEventLog::new()), ApiConfig::default());

        let outcome = r
            .resolver
            .poll(JobId(1), Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(outcome, PollOutcome::Processing);
        r.stop().await;
    }

    #[tokio::test]
    async fn test_poll_wakes_when_result_arrives() {
        let r = start(Arc::new(MemoryEventLog::new()), ApiConfig::default());
        let publisher = r.publisher.clone();

        let started = std::time::Instant::now();
        let (outcome, _) = tokio::join!(
            r.resolver.poll(JobId(5), Duration::from_secs(5)),
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                publisher.publish_result(success(5)).await.unwrap();
            }
        );

        match outcome.unwrap() {
            PollOutcome::Done(result) => {
                assert_eq!(result.job_id, JobId(5));
                assert_eq!(result.event_type, ResultEventType::Success);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
        r.stop().await;
    }

    #[tokio::test]
    async fn test_results_published_before_start_are_replayed() {
        let log = Arc::new(MemoryEventLog::new());
        EventPublisher::new(log.clone(), &broker())
            .publish_result(CompressionResultEvent::failure(JobId(9), "b", "b_compressed"))
            .await
            .unwrap();

        let r = start(log, ApiConfig::default());
        let outcome = r
            .resolver
            .poll(JobId(9), Duration::from_secs(2))
            .await
            .unwrap();

        match outcome {
            PollOutcome::Done(result) => {
                assert_eq!(result.event_type, ResultEventType::Fail);
                assert!(result.presigned_download_url.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
        r.stop().await;
    }

    #[tokio::test]
    async fn test_job_without_result_goes_stale() {
        let config = ApiConfig {
            stale_job_after: Duration::from_millis(50),
            ..ApiConfig::default()
        };
        let r = start(Arc::new(MemoryEventLog::new()), config);
        r.publisher.publish_job(job(3)).await.unwrap();
        while r.resolver.indexed_jobs().await == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        let outcome = r
            .resolver
            .poll(JobId(3), Duration::from_millis(10))
            .await
            .unwrap();

        assert_eq!(outcome, PollOutcome::Stale);
        r.stop().await;
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_an_error() {
        let r = start(Arc::new(MemoryEventLog::new()), ApiConfig::default());
        r.log.set_reads_failing(true);
        while r.resolver.is_healthy() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let err = r
            .resolver
            .poll(JobId(1), Duration::from_millis(10))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Internal(_)));
        r.stop().await;
    }

    #[tokio::test]
    async fn test_apply_ignores_foreign_records_and_evicts_old_entries() {
        let log = Arc::new(MemoryEventLog::new());
        let resolver = JobStatusResolver::new(log, &broker(), &ApiConfig::default());

        resolver
            .apply(&StreamRecord {
                id: "1-0".to_string(),
                key: "1".to_string(),
                payload: r#"{"type":"something_else"}"#.to_string(),
            })
            .await;
        assert_eq!(resolver.indexed_jobs().await, 0);

        resolver
            .apply(&StreamRecord {
                id: "1700000000000-0".to_string(),
                key: "4".to_string(),
                payload: PipelineEvent::from(success(4)).to_payload().unwrap(),
            })
            .await;
        assert_eq!(resolver.indexed_jobs().await, 1);

        let published = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        assert_eq!(
            resolver
                .evict_expired(published + chrono::Duration::hours(23))
                .await,
            0
        );
        assert_eq!(
            resolver
                .evict_expired(published + chrono::Duration::hours(25))
                .await,
            1
        );
    }

    #[test]
    fn test_record_time() {
        let t = record_time("1700000000000-3");
        assert_eq!(t.timestamp_millis(), 1_700_000_000_000);

        let before = Utc::now();
        assert!(record_time("42-0") >= before);
    }
}
