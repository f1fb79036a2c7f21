//! Redis integration tests.
//!
//! Run with: `cargo test -p vcomp-queue --test redis_stream -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use vcomp_models::{CompressionResultEvent, JobId};
use vcomp_queue::{
    BrokerConfig, CleanupQueue, CleanupTask, EventLog, EventPublisher, PipelineEvent,
    RedisCleanupQueue, RedisStreamLog, StartFrom, Subscription,
};

fn config() -> BrokerConfig {
    dotenvy::dotenv().ok();
    let suffix = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    BrokerConfig {
        job_topic: format!("vcomp:test:job:{}", suffix),
        result_topic: format!("vcomp:test:result:{}", suffix),
        cleanup_key: format!("vcomp:test:cleanup:{}", suffix),
        read_block: Duration::from_millis(200),
        ..BrokerConfig::from_env()
    }
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_ping() {
    let log = RedisStreamLog::new(&config()).expect("Failed to create client");
    log.ping().await.expect("Failed to ping Redis");
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_latest_subscription_skips_backlog() {
    let config = config();
    let log: Arc<dyn EventLog> = Arc::new(RedisStreamLog::new(&config).unwrap());
    let publisher = EventPublisher::new(log.clone(), &config);

    publisher
        .publish_result(CompressionResultEvent::failure(JobId(1), "old", "old_compressed"))
        .await
        .unwrap();

    let mut sub = Subscription::open(
        log.clone(),
        config.result_topic.clone(),
        StartFrom::Latest,
        config.read_block,
        10,
    )
    .await
    .unwrap();
    assert!(sub.next_batch().await.unwrap().is_empty());

    publisher
        .publish_result(CompressionResultEvent::failure(JobId(2), "new", "new_compressed"))
        .await
        .unwrap();

    let records = sub.next_batch().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key, "2");
    let event = PipelineEvent::from_payload(&records[0].payload).unwrap();
    assert_eq!(event.job_id(), JobId(2));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_cleanup_queue_dedups_and_claims_once() {
    let queue = RedisCleanupQueue::new(&config()).unwrap();
    let now = Utc::now();
    let task = CleanupTask::new("a", "a_compressed", now - ChronoDuration::seconds(1));

    assert!(queue.push(&task).await.unwrap());
    assert!(!queue.push(&task).await.unwrap());

    let due = queue.take_due(now, 10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].object_key, "a");
    assert!(queue.take_due(now, 10).await.unwrap().is_empty());
    assert_eq!(queue.len().await.unwrap(), 0);
}
