//! `POST /v1/embeddings`.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use forge_types::{EmbeddingArgs, EmbeddingInput};
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

use crate::error::HttpError;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(embeddings))]
pub struct EmbeddingsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/embeddings", post(embeddings))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum InputDto {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: InputDto,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EmbeddingResponse {
    pub model: String,
    pub embeddings: Vec<Vec<f32>>,
}

#[utoipa::path(
    post,
    path = "/v1/embeddings",
    tag = "embeddings",
    request_body = EmbeddingRequest,
    responses((status = 200, description = "Embeddings computed", body = EmbeddingResponse))
)]
pub async fn embeddings(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmbeddingRequest>,
) -> Result<Json<EmbeddingResponse>, HttpError> {
    let model = forge_types::ModelId::new(req.model.clone()).map_err(HttpError::from)?;
    let input = match req.input {
        InputDto::One(s) => EmbeddingInput::One(s),
        InputDto::Many(v) => EmbeddingInput::Many(v),
    };
    let result = state.server.process_embedding(EmbeddingArgs { model, input }).await?;
    Ok(Json(EmbeddingResponse { model: req.model, embeddings: result.embeddings }))
}
