//! Job identity and poll status.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Unique identifier for a compression job.
///
/// Serialized as a bare JSON integer; the broker partition key is its
/// decimal string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl JobId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Partition key used when publishing events for this job.
    pub fn partition_key(&self) -> String {
        self.0.to_string()
    }
}

impl From<i64> for JobId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid job id: {0:?}")]
pub struct JobIdParseError(pub String);

impl FromStr for JobId {
    type Err = JobIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(JobId)
            .map_err(|_| JobIdParseError(s.to_string()))
    }
}

/// Status reported to a caller polling for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// No result yet, safe to poll again
    Processing,
    /// Terminal: compressed object available
    Success,
    /// Terminal: job failed
    Fail,
    /// Published long ago and never resolved (worker likely lost it)
    Stale,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Success => "success",
            JobStatus::Fail => "fail",
            JobStatus::Stale => "stale",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Fail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;

    #[test]
    fn test_job_id_round_trips_as_integer() {
        let id = JobId(-2594881859556956603);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "-2594881859556956603");
        assert_eq!(serde_json::from_str::<JobId>(&json).unwrap(), id);
    }

    #[test]
    fn test_job_id_from_str() {
        assert_eq!("42".parse::<JobId>().unwrap(), JobId(42));
        assert_eq!(" -7 ".parse::<JobId>().unwrap(), JobId(-7));
        assert_err!("abc".parse::<JobId>());
        assert_err!("".parse::<JobId>());
    }

    #[test]
    fn test_partition_key_is_decimal() {
        assert_eq!(JobId(1234).partition_key(), "1234");
    }

    #[test]
    fn test_status_terminal() {
        assert!(JobStatus::Success.is_terminal());
        assert!(JobStatus::Fail.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(!JobStatus::Stale.is_terminal());
    }
}
