//! Application state.

use std::sync::Arc;

use anyhow::Context;

use vcomp_media::{Prober, Thumbnailer};
use vcomp_queue::{BrokerConfig, CleanupQueue, EventLog, EventPublisher};
use vcomp_storage::ObjectStore;

use crate::config::ApiConfig;
use crate::services::{CleanupScheduler, JobStatusResolver, MetadataService};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn ObjectStore>,
    pub log: Arc<dyn EventLog>,
    pub metadata: Arc<MetadataService>,
    pub status: Arc<JobStatusResolver>,
    pub cleanup: Arc<CleanupScheduler>,
}

impl AppState {
    /// Wire the services over the given collaborators.
    pub fn new(
        config: ApiConfig,
        broker: &BrokerConfig,
        store: Arc<dyn ObjectStore>,
        log: Arc<dyn EventLog>,
        cleanup_queue: Arc<dyn CleanupQueue>,
        prober: Arc<dyn Prober>,
        thumbnailer: Arc<dyn Thumbnailer>,
    ) -> Self {
        let publisher = EventPublisher::new(log.clone(), broker);
        let metadata = MetadataService::new(store.clone(), publisher, prober, thumbnailer, &config);
        let status = JobStatusResolver::new(log.clone(), broker, &config);
        let cleanup = CleanupScheduler::new(
            cleanup_queue,
            store.clone(),
            config.cleanup_max_concurrent,
            config.cleanup_tick,
        );

        Self {
            config,
            store,
            log,
            metadata: Arc::new(metadata),
            status: Arc::new(status),
            cleanup: Arc::new(cleanup),
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
}
