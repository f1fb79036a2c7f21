//! Structured job logging utilities.
//!
//! Every line carries the job id, the operation and the pipeline stage the
//! job has reached, so one job's lifecycle can be filtered from the stream.

use std::fmt;
use std::sync::Mutex;

use tracing::{error, info, warn, Span};
use vcomp_models::JobId;

/// Pipeline stage of a compression job.
///
/// Stages advance in declaration order. Any failure jumps to
/// `Published` (with a fail result) and then `Cleaned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobStage {
    Received,
    Validated,
    Downloaded,
    Pass1,
    Pass2,
    Uploaded,
    Published,
    Cleaned,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Received => "received",
            JobStage::Validated => "validated",
            JobStage::Downloaded => "downloaded",
            JobStage::Pass1 => "pass1",
            JobStage::Pass2 => "pass2",
            JobStage::Uploaded => "uploaded",
            JobStage::Published => "published",
            JobStage::Cleaned => "cleaned",
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job logger for structured logging with consistent formatting.
#[derive(Debug)]
pub struct JobLogger {
    job_id: String,
    operation: String,
    stage: Mutex<JobStage>,
}

impl JobLogger {
    /// Create a new job logger for a specific job and operation.
    pub fn new(job_id: &JobId, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
            stage: Mutex::new(JobStage::Received),
        }
    }

    /// Current stage.
    pub fn stage(&self) -> JobStage {
        self.stage.lock().map(|s| *s).unwrap_or(JobStage::Received)
    }

    /// Record that the job reached `stage`.
    pub fn advance(&self, stage: JobStage) {
        if let Ok(mut current) = self.stage.lock() {
            *current = stage;
        }
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            stage = %stage,
            "Job stage: {}", stage
        );
    }

    /// Log the start of a job operation.
    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            stage = %self.stage(),
            "Job started: {}", message
        );
    }

    /// Log a warning during job execution.
    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            stage = %self.stage(),
            "Job warning: {}", message
        );
    }

    /// Log an error during job execution.
    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            stage = %self.stage(),
            "Job error: {}", message
        );
    }

    /// Log the completion of a job operation.
    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            stage = %self.stage(),
            "Job completed: {}", message
        );
    }

    /// Get the job ID.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = %self.operation
        )
    }
}
