//! OpenAI-compatible `/v1` routes (§6 route table).

mod audio;
mod chat;
mod classifications;
mod completions;
mod detections;
mod embeddings;
mod images;
mod models;

use std::sync::Arc;

use axum::Router;
use utoipa::OpenApi;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(chat::router())
        .merge(completions::router())
        .merge(embeddings::router())
        .merge(images::router())
        .merge(audio::router())
        .merge(detections::router())
        .merge(classifications::router())
        .merge(models::router())
}

pub fn api_docs() -> utoipa::openapi::OpenApi {
    let mut doc = chat::ChatApi::openapi();
    doc.merge(completions::CompletionsApi::openapi());
    doc.merge(embeddings::EmbeddingsApi::openapi());
    doc.merge(images::ImagesApi::openapi());
    doc.merge(audio::AudioApi::openapi());
    doc.merge(classifications::ClassificationsApi::openapi());
    doc.merge(models::ModelsApi::openapi());
    doc
}
