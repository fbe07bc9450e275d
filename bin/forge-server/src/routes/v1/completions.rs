//! `POST /v1/completions` — text completion.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use forge_types::{CompletionOptions, TextCompletionArgs};
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

use crate::error::HttpError;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(completions))]
pub struct CompletionsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/completions", post(completions))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CompletionResponse {
    pub model: String,
    pub text: String,
    pub finish_reason: String,
}

#[utoipa::path(
    post,
    path = "/v1/completions",
    tag = "completions",
    request_body = CompletionRequest,
    responses((status = 200, description = "Completion generated", body = CompletionResponse))
)]
pub async fn completions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CompletionRequest>,
) -> Result<Json<CompletionResponse>, HttpError> {
    let model = forge_types::ModelId::new(req.model.clone()).map_err(HttpError::from)?;
    let args = TextCompletionArgs {
        model,
        prompt: req.prompt,
        options: CompletionOptions {
            timeout: req.timeout_ms.map(Duration::from_millis),
            signal: None,
            on_chunk: None,
        },
    };
    let result = state.server.process_text_completion(args).await?;
    Ok(Json(CompletionResponse {
        model: req.model,
        text: result.text,
        finish_reason: format!("{:?}", result.finish_reason),
    }))
}
