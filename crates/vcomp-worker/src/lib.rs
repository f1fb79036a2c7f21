//! Compression worker.
//!
//! This crate provides:
//! - The job-topic consume loop starting at the newest offset
//! - Per-job pipeline: download, two-pass transcode, upload, presign
//! - Exactly one result event per accepted job
//! - Scratch cleanup, job timeout and graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod pipeline;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{CompressionWorker, JobOutcome};
pub use logging::{JobLogger, JobStage};
pub use pipeline::CompressionPipeline;
