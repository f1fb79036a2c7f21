//! Redis Streams implementation of [`EventLog`].

use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{StreamRangeReply, StreamReadReply};
use tracing::{debug, info};

use crate::error::{QueueError, QueueResult};
use crate::log::{EventLog, StartFrom, StreamRecord, ORIGIN_ID};

const FIELD_KEY: &str = "key";
const FIELD_PAYLOAD: &str = "payload";

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream carrying compression jobs
    pub job_topic: String,
    /// Stream carrying compression results
    pub result_topic: String,
    /// Sorted set holding pending cleanups
    pub cleanup_key: String,
    /// Approximate retained length of each stream
    pub max_len: usize,
    /// Per-attempt publish deadline
    pub publish_timeout: Duration,
    /// Total publish attempts, including the first
    pub publish_attempts: u32,
    /// Fixed pause between publish attempts
    pub publish_backoff: Duration,
    /// How long a read waits for new records
    pub read_block: Duration,
    /// Max records per read
    pub read_batch: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            job_topic: "vcomp:compression-job".to_string(),
            result_topic: "vcomp:compression-result".to_string(),
            cleanup_key: "vcomp:cleanup".to_string(),
            max_len: 100_000,
            publish_timeout: Duration::from_secs(10),
            publish_attempts: 3,
            publish_backoff: Duration::from_millis(250),
            read_block: Duration::from_secs(1),
            read_batch: 100,
        }
    }
}

impl BrokerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let millis = |name: &str, default: Duration| {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            job_topic: std::env::var("BROKER_JOB_TOPIC").unwrap_or(defaults.job_topic),
            result_topic: std::env::var("BROKER_RESULT_TOPIC").unwrap_or(defaults.result_topic),
            cleanup_key: std::env::var("BROKER_CLEANUP_KEY").unwrap_or(defaults.cleanup_key),
            max_len: std::env::var("BROKER_MAX_LEN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_len),
            publish_timeout: millis("BROKER_PUBLISH_TIMEOUT_MS", defaults.publish_timeout),
            publish_attempts: std::env::var("BROKER_PUBLISH_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.publish_attempts),
            publish_backoff: millis("BROKER_PUBLISH_BACKOFF_MS", defaults.publish_backoff),
            read_block: millis("BROKER_READ_BLOCK_MS", defaults.read_block),
            read_batch: defaults.read_batch,
        }
    }
}

/// Topics as Redis Streams. Each entry holds `key` and `payload` fields.
#[derive(Clone)]
pub struct RedisStreamLog {
    client: redis::Client,
    max_len: usize,
}

impl RedisStreamLog {
    pub fn new(config: &BrokerConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            max_len: config.max_len,
        })
    }

    pub fn client(&self) -> &redis::Client {
        &self.client
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }
}

#[async_trait]
impl EventLog for RedisStreamLog {
    async fn append(&self, topic: &str, key: &str, payload: &str) -> QueueResult<String> {
        let mut conn = self.connection().await?;

        let id: String = redis::cmd("XADD")
            .arg(topic)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_len)
            .arg("*")
            .arg(FIELD_KEY)
            .arg(key)
            .arg(FIELD_PAYLOAD)
            .arg(payload)
            .query_async(&mut conn)
            .await?;

        debug!(topic, key, id = %id, "Appended record");
        Ok(id)
    }

    async fn read(
        &self,
        topic: &str,
        after_id: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<StreamRecord>> {
        // Blocking reads get their own connection so they never stall appends.
        let mut conn = self.connection().await?;

        let mut cmd = redis::cmd("XREAD");
        cmd.arg("COUNT").arg(count);
        if !block.is_zero() {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(topic).arg(after_id);

        let reply: Option<StreamReadReply> = cmd.query_async(&mut conn).await?;

        let mut records = Vec::new();
        for stream in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in stream.ids {
                let payload: Option<String> = entry.get(FIELD_PAYLOAD);
                let Some(payload) = payload else {
                    debug!(topic, id = %entry.id, "Skipping entry without payload");
                    continue;
                };
                records.push(StreamRecord {
                    key: entry.get(FIELD_KEY).unwrap_or_default(),
                    id: entry.id,
                    payload,
                });
            }
        }
        Ok(records)
    }

    async fn start_offset(&self, topic: &str, from: StartFrom) -> QueueResult<String> {
        match from {
            StartFrom::Earliest => Ok(ORIGIN_ID.to_string()),
            StartFrom::Latest => {
                let mut conn = self.connection().await?;
                let reply: StreamRangeReply = redis::cmd("XREVRANGE")
                    .arg(topic)
                    .arg("+")
                    .arg("-")
                    .arg("COUNT")
                    .arg(1)
                    .query_async(&mut conn)
                    .await?;
                let id = reply
                    .ids
                    .into_iter()
                    .next()
                    .map(|e| e.id)
                    .unwrap_or_else(|| ORIGIN_ID.to_string());
                info!(topic, id = %id, "Resolved latest offset");
                Ok(id)
            }
        }
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
