//! Metadata lookup and thumbnails.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use vcomp_models::{Metadata, PresignedRequest};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ObjectKeyParams {
    pub object_key: String,
}

impl ObjectKeyParams {
    fn key(&self) -> ApiResult<&str> {
        let key = self.object_key.trim();
        if key.is_empty() {
            return Err(ApiError::validation("object_key must not be empty"));
        }
        Ok(key)
    }
}

/// GET /api/metadata?object_key=
pub async fn get_metadata(
    State(state): State<AppState>,
    Query(params): Query<ObjectKeyParams>,
) -> ApiResult<Json<Metadata>> {
    let metadata = state.metadata.extract_metadata(params.key()?).await?;
    Ok(Json(metadata))
}

#[derive(Debug, Serialize)]
pub struct ThumbnailResponse {
    pub object_key: String,
    pub presigned_url: PresignedRequest,
}

/// POST /api/thumbnail
pub async fn create_thumbnail(
    State(state): State<AppState>,
    Json(params): Json<ObjectKeyParams>,
) -> ApiResult<Json<ThumbnailResponse>> {
    let key = params.key()?;
    let presigned_url = state.metadata.extract_thumbnail(key).await?;
    Ok(Json(ThumbnailResponse {
        object_key: key.to_string(),
        presigned_url,
    }))
}
