//! Upload URL issuance.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::error::ApiResult;
use crate::services::UploadTicket;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
}

/// POST /api/upload
///
/// Returns a fresh job id, the object key and a presigned PUT the caller
/// uploads to directly.
pub async fn issue_upload_url(
    State(state): State<AppState>,
    Json(request): Json<UploadRequest>,
) -> ApiResult<Json<UploadTicket>> {
    let ticket = state.metadata.issue_upload_url(&request.filename).await?;
    Ok(Json(ticket))
}
