//! Shared data models for the vcomp compression pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Job identifiers and poll status
//! - Probe metadata
//! - Compression job and result events
//! - Presigned request descriptors
//! - Job and object key derivation

pub mod event;
pub mod job;
pub mod keys;
pub mod metadata;

// Re-export common types
pub use event::{
    CompressionJobEvent, CompressionResultEvent, PresignedRequest, ResultEventType,
};
pub use job::{JobId, JobIdParseError, JobStatus};
pub use keys::{
    base_job_hash, compressed_key, derive_job_id, derive_object_key, thumbnail_key,
};
pub use metadata::{DurationError, Metadata, Tags};
