//! Broker plumbing for the compression pipeline.
//!
//! This crate provides:
//! - The tagged event envelope carried on both topics
//! - An append-only [`EventLog`] abstraction over Redis Streams
//! - A publisher with bounded retry on transient broker errors
//! - A persisted delayed queue for storage cleanup
//! - In-memory implementations for tests and single-process runs

pub mod cleanup;
pub mod error;
pub mod event;
pub mod log;
pub mod memory;
pub mod publisher;
pub mod retry;
pub mod stream;

pub use cleanup::{CleanupQueue, CleanupTask, RedisCleanupQueue};
pub use error::{QueueError, QueueResult};
pub use event::PipelineEvent;
pub use log::{EventLog, StartFrom, StreamRecord, Subscription};
pub use memory::{MemoryCleanupQueue, MemoryEventLog};
pub use publisher::EventPublisher;
pub use retry::{retry_async_if, FailureTracker, RetryConfig, RetryResult};
pub use stream::{BrokerConfig, RedisStreamLog};
