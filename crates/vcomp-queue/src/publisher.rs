//! Event publication with bounded retry.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use vcomp_models::{CompressionJobEvent, CompressionResultEvent};

use crate::error::{QueueError, QueueResult};
use crate::event::PipelineEvent;
use crate::log::EventLog;
use crate::retry::{retry_async_if, RetryConfig, RetryResult};
use crate::stream::BrokerConfig;

/// Publishes job and result events keyed by job id.
///
/// Each attempt has its own deadline. Transient failures are retried with a
/// fixed pause up to the configured attempt count; anything else is
/// returned at once.
#[derive(Clone)]
pub struct EventPublisher {
    log: Arc<dyn EventLog>,
    job_topic: String,
    result_topic: String,
    retry: RetryConfig,
    attempt_timeout: Duration,
}

impl EventPublisher {
    pub fn new(log: Arc<dyn EventLog>, config: &BrokerConfig) -> Self {
        Self {
            log,
            job_topic: config.job_topic.clone(),
            result_topic: config.result_topic.clone(),
            retry: RetryConfig::new("publish")
                .with_attempts(config.publish_attempts)
                .with_fixed_delay(config.publish_backoff),
            attempt_timeout: config.publish_timeout,
        }
    }

    pub fn job_topic(&self) -> &str {
        &self.job_topic
    }

    pub fn result_topic(&self) -> &str {
        &self.result_topic
    }

    /// Publish a compression request. Returns the record id.
    pub async fn publish_job(&self, event: CompressionJobEvent) -> QueueResult<String> {
        let topic = self.job_topic.clone();
        self.publish(&topic, PipelineEvent::CompressionJob(event)).await
    }

    /// Publish a terminal job outcome. Returns the record id.
    pub async fn publish_result(&self, event: CompressionResultEvent) -> QueueResult<String> {
        let topic = self.result_topic.clone();
        self.publish(&topic, PipelineEvent::CompressionResult(event))
            .await
    }

    async fn publish(&self, topic: &str, event: PipelineEvent) -> QueueResult<String> {
        let payload = event.to_payload()?;
        let key = event.partition_key();
        let timeout = self.attempt_timeout;
        let log = &self.log;
        let (key_ref, payload_ref) = (key.as_str(), payload.as_str());

        let result = retry_async_if(&self.retry, QueueError::is_transient, || async move {
            match tokio::time::timeout(timeout, log.append(topic, key_ref, payload_ref)).await {
                Ok(result) => result,
                Err(_) => Err(QueueError::Timeout(timeout)),
            }
        })
        .await;

        match result {
            RetryResult::Success(id) => {
                info!(topic, job_id = %key, id = %id, kind = event.kind(), "Published event");
                Ok(id)
            }
            RetryResult::Failed { error, attempts } => {
                warn!(
                    topic,
                    job_id = %key,
                    attempts,
                    "Failed to publish {}: {}",
                    event.kind(),
                    error
                );
                Err(error)
            }
        }
    }
}
