//! Compression job and result events.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobStatus};
use crate::metadata::Metadata;

/// A presigned HTTP request the caller can execute without store credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedRequest {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Request to transcode an uploaded object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionJobEvent {
    pub job_id: JobId,
    pub object_key: String,
    pub metadata: Metadata,
}

/// Outcome of a compression job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultEventType {
    Success,
    Fail,
}

impl ResultEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultEventType::Success => "success",
            ResultEventType::Fail => "fail",
        }
    }
}

impl From<ResultEventType> for JobStatus {
    fn from(value: ResultEventType) -> Self {
        match value {
            ResultEventType::Success => JobStatus::Success,
            ResultEventType::Fail => JobStatus::Fail,
        }
    }
}

/// Terminal record for a job, published exactly once by the worker.
///
/// Only the constructors below build this type in production code, which
/// keeps the download URL and expiry absent on failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionResultEvent {
    pub event_type: ResultEventType,
    pub job_id: JobId,
    pub object_key: String,
    pub compressed_key: String,
    #[serde(default)]
    pub presigned_download_url: Option<PresignedRequest>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

impl CompressionResultEvent {
    /// Successful compression with a download URL valid until `expiry`.
    pub fn success(
        job_id: JobId,
        object_key: impl Into<String>,
        compressed_key: impl Into<String>,
        download: PresignedRequest,
        expiry: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: ResultEventType::Success,
            job_id,
            object_key: object_key.into(),
            compressed_key: compressed_key.into(),
            presigned_download_url: Some(download),
            expiry: Some(expiry),
        }
    }

    /// Failed compression. Never carries a URL or expiry.
    pub fn failure(
        job_id: JobId,
        object_key: impl Into<String>,
        compressed_key: impl Into<String>,
    ) -> Self {
        Self {
            event_type: ResultEventType::Fail,
            job_id,
            object_key: object_key.into(),
            compressed_key: compressed_key.into(),
            presigned_download_url: None,
            expiry: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.event_type.into()
    }

    pub fn is_success(&self) -> bool {
        self.event_type == ResultEventType::Success
    }
}
