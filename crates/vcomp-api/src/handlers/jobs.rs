//! Job start and status polling.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use vcomp_models::{CompressionResultEvent, JobId, JobStatus};

use crate::error::{ApiError, ApiResult};
use crate::services::PollOutcome;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartJobRequest {
    pub job_id: JobId,
    pub object_key: String,
}

#[derive(Debug, Serialize)]
pub struct StartJobResponse {
    pub job_id: JobId,
    pub status: &'static str,
}

/// POST /api/jobs
///
/// Probes the uploaded object and publishes a compression job. Returns as
/// soon as the job is on the topic.
pub async fn start_job(
    State(state): State<AppState>,
    Json(request): Json<StartJobRequest>,
) -> ApiResult<Json<StartJobResponse>> {
    let object_key = request.object_key.trim();
    if object_key.is_empty() {
        return Err(ApiError::validation("object_key must not be empty"));
    }

    let metadata = state.metadata.extract_metadata(object_key).await?;
    state
        .metadata
        .start_compression_job(request.job_id, object_key, metadata)
        .await?;

    info!(job_id = %request.job_id, object_key, "Started compression job");
    Ok(Json(StartJobResponse {
        job_id: request.job_id,
        status: "started",
    }))
}

#[derive(Debug, Deserialize)]
pub struct JobStatusQuery {
    pub job_id: String,
}

/// Either the terminal result or a pending marker.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum JobStatusResponse {
    Result(CompressionResultEvent),
    Pending { status: JobStatus, job_id: JobId },
}

/// GET /api/jobs/status?job_id=
///
/// Waits up to the poll timeout for a result. A found result arms the
/// deferred cleanup of its objects.
pub async fn job_status(
    State(state): State<AppState>,
    Query(query): Query<JobStatusQuery>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job_id: JobId = query
        .job_id
        .parse()
        .map_err(|e: vcomp_models::JobIdParseError| ApiError::bad_request(e.to_string()))?;

    let outcome = state
        .status
        .poll(job_id, state.config.status_poll_timeout)
        .await?;

    let response = match outcome {
        PollOutcome::Done(result) => {
            if let Err(e) = state.cleanup.schedule(&result).await {
                warn!(job_id = %job_id, "Failed to arm cleanup: {}", e);
            }
            JobStatusResponse::Result(result)
        }
        PollOutcome::Processing => JobStatusResponse::Pending {
            status: JobStatus::Processing,
            job_id,
        },
        PollOutcome::Stale => {
            warn!(job_id = %job_id, "Job has no result and is stale");
            JobStatusResponse::Pending {
                status: JobStatus::Stale,
                job_id,
            }
        }
    };

    Ok(Json(response))
}
