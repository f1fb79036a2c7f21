//! Append-only topic abstraction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueResult;

/// Id that sorts before every record.
pub const ORIGIN_ID: &str = "0-0";

/// One record read from a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    /// Broker-assigned, monotonically increasing within a topic
    pub id: String,
    /// Partition key the record was appended with
    pub key: String,
    pub payload: String,
}

/// Where a new reader starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFrom {
    /// Replay everything still retained
    Earliest,
    /// Only records appended after the reader opens
    Latest,
}

/// A durable, ordered, append-only log of topics.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append a record and return its id once durably accepted.
    async fn append(&self, topic: &str, key: &str, payload: &str) -> QueueResult<String>;

    /// Read up to `count` records with ids greater than `after_id`, waiting
    /// up to `block` for the first one. An empty result is not an error.
    async fn read(
        &self,
        topic: &str,
        after_id: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<StreamRecord>>;

    /// Resolve a [`StartFrom`] to a cursor id.
    async fn start_offset(&self, topic: &str, from: StartFrom) -> QueueResult<String>;

    /// Cheap round trip used by readiness checks.
    async fn ping(&self) -> QueueResult<()>;
}

/// A cursor over one topic.
pub struct Subscription {
    log: Arc<dyn EventLog>,
    topic: String,
    cursor: String,
    block: Duration,
    batch: usize,
}

impl Subscription {
    pub async fn open(
        log: Arc<dyn EventLog>,
        topic: impl Into<String>,
        from: StartFrom,
        block: Duration,
        batch: usize,
    ) -> QueueResult<Self> {
        let topic = topic.into();
        let cursor = log.start_offset(&topic, from).await?;
        Ok(Self {
            log,
            topic,
            cursor,
            block,
            batch: batch.max(1),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn cursor(&self) -> &str {
        &self.cursor
    }

    /// Next batch of records; advances the cursor past them.
    pub async fn next_batch(&mut self) -> QueueResult<Vec<StreamRecord>> {
        let records = self
            .log
            .read(&self.topic, &self.cursor, self.block, self.batch)
            .await?;
        if let Some(last) = records.last() {
            self.cursor = last.id.clone();
        }
        Ok(records)
    }
}
