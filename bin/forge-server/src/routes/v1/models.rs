//! `GET /v1/models` — inventory of every configured model, sourced from
//! [`forge_server::InferenceServer::list_models`].

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(list_models))]
pub struct ModelsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/models", get(list_models))
}

#[derive(Debug, Serialize)]
pub struct ModelSummary {
    pub id: String,
    pub status: &'static str,
    pub error: Option<String>,
}

#[utoipa::path(
    get,
    path = "/v1/models",
    tag = "models",
    responses((status = 200, description = "Configured models and their load status"))
)]
pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<Vec<ModelSummary>> {
    let models = state.server.list_models().await;
    Json(
        models
            .into_iter()
            .map(|m| ModelSummary {
                id: m.config.id.to_string(),
                status: match m.status {
                    forge_store::ModelStatus::Unloaded => "unloaded",
                    forge_store::ModelStatus::Preparing => "preparing",
                    forge_store::ModelStatus::Ready => "ready",
                    forge_store::ModelStatus::Error => "error",
                },
                error: m.error,
            })
            .collect(),
    )
}
