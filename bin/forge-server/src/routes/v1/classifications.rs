//! `POST /v1/classifications` — non-standard extension (§6).

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use forge_types::TextClassificationArgs;
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

use crate::error::HttpError;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(classifications))]
pub struct ClassificationsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/classifications", post(classifications))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ClassificationRequest {
    pub model: String,
    pub text: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LabelScore {
    pub label: String,
    pub score: f32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ClassificationResponse {
    pub labels: Vec<LabelScore>,
}

#[utoipa::path(
    post,
    path = "/v1/classifications",
    tag = "classifications",
    request_body = ClassificationRequest,
    responses((status = 200, description = "Label scores", body = ClassificationResponse))
)]
pub async fn classifications(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClassificationRequest>,
) -> Result<Json<ClassificationResponse>, HttpError> {
    let model = forge_types::ModelId::new(req.model).map_err(HttpError::from)?;
    let result = state
        .server
        .process_text_classification(TextClassificationArgs { model, text: req.text })
        .await?;
    Ok(Json(ClassificationResponse {
        labels: result.labels.into_iter().map(|(label, score)| LabelScore { label, score }).collect(),
    }))
}
