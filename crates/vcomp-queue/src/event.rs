//! Envelope for records on the job and result topics.

use serde::{Deserialize, Serialize};
use vcomp_models::{CompressionJobEvent, CompressionResultEvent, JobId};

use crate::error::QueueResult;

/// Every record payload carries an explicit `type` tag. Payloads whose tag
/// is missing or unknown fail to decode and are skipped by consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    CompressionJob(CompressionJobEvent),
    CompressionResult(CompressionResultEvent),
}

impl PipelineEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            PipelineEvent::CompressionJob(e) => e.job_id,
            PipelineEvent::CompressionResult(e) => e.job_id,
        }
    }

    /// Key the record is published under, so all events of a job share it.
    pub fn partition_key(&self) -> String {
        self.job_id().partition_key()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::CompressionJob(_) => "compression_job",
            PipelineEvent::CompressionResult(_) => "compression_result",
        }
    }

    pub fn to_payload(&self) -> QueueResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_payload(payload: &str) -> QueueResult<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

impl From<CompressionJobEvent> for PipelineEvent {
    fn from(event: CompressionJobEvent) -> Self {
        PipelineEvent::CompressionJob(event)
    }
}

impl From<CompressionResultEvent> for PipelineEvent {
    fn from(event: CompressionResultEvent) -> Self {
        PipelineEvent::CompressionResult(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;
    use vcomp_models::Metadata;

    #[test]
    fn test_job_envelope_is_tagged() {
        let event = PipelineEvent::from(CompressionJobEvent {
            job_id: JobId(77),
            object_key: "a.mp4_1".to_string(),
            metadata: Metadata {
                duration: "218.15".to_string(),
                ..Default::default()
            },
        });
        let value: serde_json::Value =
            serde_json::from_str(&event.to_payload().unwrap()).unwrap();

        assert_eq!(value["type"], "compression_job");
        assert_eq!(value["job_id"], 77);
        assert_eq!(value["metadata"]["duration"], "218.15");
        assert_eq!(event.partition_key(), "77");
    }

    #[test]
    fn test_untagged_or_foreign_payloads_are_rejected() {
        assert_err!(PipelineEvent::from_payload(r#"{"job_id":1,"object_key":"a"}"#));
        assert_err!(PipelineEvent::from_payload(r#"{"type":"render_clip","job_id":1}"#));
        assert_err!(PipelineEvent::from_payload("garbage"));
    }

    #[test]
    fn test_result_envelope_decodes() {
        let payload = r#"{
            "type": "compression_result",
            "event_type": "fail",
            "job_id": 5,
            "object_key": "a",
            "compressed_key": "a_compressed",
            "presigned_download_url": null,
            "expiry": null
        }"#;
        match PipelineEvent::from_payload(payload).unwrap() {
            PipelineEvent::CompressionResult(r) => {
                assert_eq!(r.job_id, JobId(5));
                assert!(!r.is_success());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
