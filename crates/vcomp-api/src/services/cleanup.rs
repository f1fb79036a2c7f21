//! Deferred deletion of source and compressed objects.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use vcomp_models::CompressionResultEvent;
use vcomp_queue::{CleanupQueue, CleanupTask, FailureTracker, QueueResult};
use vcomp_storage::ObjectStore;

/// How long shutdown waits for in-flight deletions.
const DRAIN_ON_SHUTDOWN: Duration = Duration::from_secs(10);

/// Arms cleanups into a persisted queue and deletes them once due.
///
/// At most `max_concurrent` deletions run at a time. Deletion is best
/// effort: failures are logged and the task is dropped.
pub struct CleanupScheduler {
    queue: Arc<dyn CleanupQueue>,
    store: Arc<dyn ObjectStore>,
    permits: Arc<Semaphore>,
    tick: Duration,
}

impl CleanupScheduler {
    pub fn new(
        queue: Arc<dyn CleanupQueue>,
        store: Arc<dyn ObjectStore>,
        max_concurrent: usize,
        tick: Duration,
    ) -> Self {
        Self {
            queue,
            store,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tick,
        }
    }

    /// Arm a cleanup for the result's key pair, due at its expiry (now for
    /// failures). Returns `false` if the pair is already armed.
    pub async fn schedule(&self, result: &CompressionResultEvent) -> QueueResult<bool> {
        let due_at = result.expiry.unwrap_or_else(Utc::now);
        let task = CleanupTask::new(&result.object_key, &result.compressed_key, due_at);
        let armed = self.queue.push(&task).await?;
        if armed {
            info!(
                job_id = %result.job_id,
                object_key = %task.object_key,
                due_at = %due_at,
                success = result.is_success(),
                "Armed cleanup"
            );
        }
        Ok(armed)
    }

    /// Start deletions for due tasks, up to the free worker slots.
    /// Returns the number started.
    pub async fn drain_due(&self, in_flight: &mut JoinSet<()>) -> QueueResult<usize> {
        let free = self.permits.available_permits();
        if free == 0 {
            return Ok(0);
        }

        let tasks = self.queue.take_due(Utc::now(), free).await?;
        let started = tasks.len();
        for task in tasks {
            let permit = match self.permits.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    // Slots are only taken here.
                    warn!(object_key = %task.object_key, "No cleanup slot; dropping task");
                    continue;
                }
            };
            let store = self.store.clone();
            in_flight.spawn(async move {
                delete_pair(store.as_ref(), &task).await;
                drop(permit);
            });
        }
        Ok(started)
    }

    /// Scan the queue every tick until `shutdown` turns true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting cleanup scheduler (interval: {:?})", self.tick);

        let mut ticker = interval(self.tick);
        let mut in_flight = JoinSet::new();
        let mut failures = FailureTracker::new(3);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            while in_flight.try_join_next().is_some() {}

            match self.drain_due(&mut in_flight).await {
                Ok(0) => {}
                Ok(n) => {
                    failures.record_success();
                    debug!("Started {} cleanup deletions", n);
                }
                Err(e) => {
                    if failures.record_failure() {
                        error!("Cleanup queue scan failed: {}", e);
                    }
                }
            }
        }

        let pending = in_flight.len();
        if pending > 0 {
            info!("Waiting for {} cleanup deletions", pending);
            let drained = tokio::time::timeout(DRAIN_ON_SHUTDOWN, async {
                while in_flight.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!("Abandoning {} cleanup deletions", in_flight.len());
                in_flight.abort_all();
            }
        }
        info!("Cleanup scheduler stopped");
    }
}

async fn delete_pair(store: &dyn ObjectStore, task: &CleanupTask) {
    match store.delete_objects(&task.keys()).await {
        Ok(deleted) => info!(
            object_key = %task.object_key,
            compressed_key = %task.compressed_key,
            deleted,
            "Deleted expired objects"
        ),
        Err(e) => warn!(
            object_key = %task.object_key,
            compressed_key = %task.compressed_key,
            "Cleanup failed: {}", e
        ),
    }
}
