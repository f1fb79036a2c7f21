//! Persisted delayed queue of storage cleanups.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{QueueError, QueueResult};
use crate::stream::BrokerConfig;

/// Delete `object_key` and `compressed_key` once `due_at` has passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupTask {
    pub object_key: String,
    pub compressed_key: String,
    pub due_at: DateTime<Utc>,
}

impl CleanupTask {
    pub fn new(
        object_key: impl Into<String>,
        compressed_key: impl Into<String>,
        due_at: DateTime<Utc>,
    ) -> Self {
        Self {
            object_key: object_key.into(),
            compressed_key: compressed_key.into(),
            due_at,
        }
    }

    pub fn keys(&self) -> Vec<String> {
        vec![self.object_key.clone(), self.compressed_key.clone()]
    }
}

/// Sorted-set member: the key pair alone, so re-arming the same pair is a no-op.
#[derive(Debug, Serialize, Deserialize)]
struct KeyPair {
    object_key: String,
    compressed_key: String,
}

#[async_trait]
pub trait CleanupQueue: Send + Sync {
    /// Persist a task. Returns `false` if the key pair is already queued.
    async fn push(&self, task: &CleanupTask) -> QueueResult<bool>;

    /// Remove and return up to `limit` tasks due at or before `now`,
    /// earliest first. Each task is handed to exactly one caller.
    async fn take_due(&self, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<CleanupTask>>;

    async fn len(&self) -> QueueResult<u64>;
}

/// Cleanup queue stored in a Redis sorted set scored by due time (unix ms).
#[derive(Clone)]
pub struct RedisCleanupQueue {
    client: redis::Client,
    key: String,
}

impl RedisCleanupQueue {
    pub fn new(config: &BrokerConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            key: config.cleanup_key.clone(),
        })
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }
}

#[async_trait]
impl CleanupQueue for RedisCleanupQueue {
    async fn push(&self, task: &CleanupTask) -> QueueResult<bool> {
        let member = serde_json::to_string(&KeyPair {
            object_key: task.object_key.clone(),
            compressed_key: task.compressed_key.clone(),
        })?;

        let mut conn = self.connection().await?;
        let added: i64 = redis::cmd("ZADD")
            .arg(&self.key)
            .arg("NX")
            .arg(task.due_at.timestamp_millis())
            .arg(&member)
            .query_async(&mut conn)
            .await?;

        Ok(added == 1)
    }

    async fn take_due(&self, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<CleanupTask>> {
        let mut conn = self.connection().await?;

        let candidates: Vec<(String, f64)> = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.key)
            .arg("-inf")
            .arg(now.timestamp_millis())
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await?;

        let mut tasks = Vec::with_capacity(candidates.len());
        for (member, score) in candidates {
            // Another instance may have claimed it between the range and here.
            let removed: i64 = redis::cmd("ZREM")
                .arg(&self.key)
                .arg(&member)
                .query_async(&mut conn)
                .await?;
            if removed != 1 {
                continue;
            }

            let pair: KeyPair = match serde_json::from_str(&member) {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Dropping malformed cleanup entry {:?}: {}", member, e);
                    continue;
                }
            };
            let due_at = Utc
                .timestamp_millis_opt(score as i64)
                .single()
                .unwrap_or(now);
            tasks.push(CleanupTask {
                object_key: pair.object_key,
                compressed_key: pair.compressed_key,
                due_at,
            });
        }

        Ok(tasks)
    }

    async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = redis::cmd("ZCARD")
            .arg(&self.key)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }
}
