//! In-memory [`EventLog`] and [`CleanupQueue`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::cleanup::{CleanupQueue, CleanupTask};
use crate::error::{QueueError, QueueResult};
use crate::log::{EventLog, StartFrom, StreamRecord, ORIGIN_ID};

fn parse_seq(id: &str) -> QueueResult<u64> {
    id.split('-')
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| QueueError::malformed(format!("invalid record id {:?}", id)))
}

#[derive(Debug, Clone, Copy)]
enum InjectedFailure {
    Transient,
    Permanent,
}

/// Topics held in process memory, with the same read semantics as the
/// Redis implementation. Failures can be injected for tests.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    topics: Mutex<HashMap<String, Vec<(u64, StreamRecord)>>>,
    next_seq: AtomicU64,
    notify: Notify,
    append_attempts: AtomicUsize,
    pending_failures: Mutex<Vec<InjectedFailure>>,
    reads_fail: AtomicBool,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` appends fail with a retryable error.
    pub fn fail_next_appends(&self, n: usize) {
        self.push_failures(n, InjectedFailure::Transient);
    }

    /// Make the next append fail with a non-retryable error.
    pub fn reject_next_append(&self) {
        self.push_failures(1, InjectedFailure::Permanent);
    }

    fn push_failures(&self, n: usize, kind: InjectedFailure) {
        if let Ok(mut pending) = self.pending_failures.lock() {
            pending.extend(std::iter::repeat(kind).take(n));
        }
    }

    /// Make every read fail until reset.
    pub fn set_reads_failing(&self, failing: bool) {
        self.reads_fail.store(failing, Ordering::SeqCst);
    }

    /// Number of append calls, including failed ones.
    pub fn append_attempts(&self) -> usize {
        self.append_attempts.load(Ordering::SeqCst)
    }

    /// Snapshot of every record on `topic`.
    pub fn records(&self, topic: &str) -> Vec<StreamRecord> {
        self.topics
            .lock()
            .map(|t| {
                t.get(topic)
                    .map(|r| r.iter().map(|(_, rec)| rec.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    fn lock_poisoned() -> QueueError {
        QueueError::connection_failed("memory log lock poisoned")
    }

    fn collect_after(&self, topic: &str, after: u64, count: usize) -> QueueResult<Vec<StreamRecord>> {
        let topics = self.topics.lock().map_err(|_| Self::lock_poisoned())?;
        Ok(topics
            .get(topic)
            .map(|records| {
                records
                    .iter()
                    .filter(|(seq, _)| *seq > after)
                    .take(count)
                    .map(|(_, rec)| rec.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, topic: &str, key: &str, payload: &str) -> QueueResult<String> {
        self.append_attempts.fetch_add(1, Ordering::SeqCst);

        let injected = {
            let mut pending = self
                .pending_failures
                .lock()
                .map_err(|_| Self::lock_poisoned())?;
            (!pending.is_empty()).then(|| pending.remove(0))
        };
        match injected {
            Some(InjectedFailure::Transient) => {
                return Err(QueueError::connection_failed("leader not available"))
            }
            Some(InjectedFailure::Permanent) => {
                return Err(QueueError::rejected("message too large"))
            }
            None => {}
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{}-0", seq);
        {
            let mut topics = self.topics.lock().map_err(|_| Self::lock_poisoned())?;
            topics.entry(topic.to_string()).or_default().push((
                seq,
                StreamRecord {
                    id: id.clone(),
                    key: key.to_string(),
                    payload: payload.to_string(),
                },
            ));
        }
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn read(
        &self,
        topic: &str,
        after_id: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<StreamRecord>> {
        if self.reads_fail.load(Ordering::SeqCst) {
            return Err(QueueError::connection_failed("memory log unreachable"));
        }

        let after = parse_seq(after_id)?;
        let deadline = Instant::now() + block;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let records = self.collect_after(topic, after, count)?;
            if !records.is_empty() || Instant::now() >= deadline {
                return Ok(records);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.collect_after(topic, after, count);
            }
        }
    }

    async fn start_offset(&self, topic: &str, from: StartFrom) -> QueueResult<String> {
        match from {
            StartFrom::Earliest => Ok(ORIGIN_ID.to_string()),
            StartFrom::Latest => {
                let topics = self.topics.lock().map_err(|_| Self::lock_poisoned())?;
                Ok(topics
                    .get(topic)
                    .and_then(|r| r.last())
                    .map(|(_, rec)| rec.id.clone())
                    .unwrap_or_else(|| ORIGIN_ID.to_string()))
            }
        }
    }

    async fn ping(&self) -> QueueResult<()> {
        if self.reads_fail.load(Ordering::SeqCst) {
            return Err(QueueError::connection_failed("memory log unreachable"));
        }
        Ok(())
    }
}

/// Cleanup tasks held in process memory, deduplicated by key pair.
#[derive(Debug, Default)]
pub struct MemoryCleanupQueue {
    tasks: Mutex<HashMap<(String, String), DateTime<Utc>>>,
}

impl MemoryCleanupQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CleanupQueue for MemoryCleanupQueue {
    async fn push(&self, task: &CleanupTask) -> QueueResult<bool> {
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| QueueError::connection_failed("cleanup lock poisoned"))?;
        let pair = (task.object_key.clone(), task.compressed_key.clone());
        if tasks.contains_key(&pair) {
            return Ok(false);
        }
        tasks.insert(pair, task.due_at);
        Ok(true)
    }

    async fn take_due(&self, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<CleanupTask>> {
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| QueueError::connection_failed("cleanup lock poisoned"))?;

        let mut due: Vec<CleanupTask> = tasks
            .iter()
            .filter(|(_, due_at)| **due_at <= now)
            .map(|((object_key, compressed_key), due_at)| CleanupTask {
                object_key: object_key.clone(),
                compressed_key: compressed_key.clone(),
                due_at: *due_at,
            })
            .collect();
        due.sort_by_key(|t| t.due_at);
        due.truncate(limit);

        for task in &due {
            tasks.remove(&(task.object_key.clone(), task.compressed_key.clone()));
        }
        Ok(due)
    }

    async fn len(&self) -> QueueResult<u64> {
        let tasks = self
            .tasks
            .lock()
            .map_err(|_| QueueError::connection_failed("cleanup lock poisoned"))?;
        Ok(tasks.len() as u64)
    }
}
