//! Audio routes: `POST /v1/audio/transcriptions`, `POST /v1/audio/speech`.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Multipart, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use forge_types::{CompletionOptions, SpeechToTextArgs, TextToSpeechArgs};
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

use crate::error::HttpError;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(speech))]
pub struct AudioApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/audio/transcriptions", post(transcriptions))
        .route("/audio/speech", post(speech))
}

/// `multipart/form-data` with `model` and `file` fields.
pub async fn transcriptions(
    State(state): State<Arc<AppState>>,
    mut form: Multipart,
) -> Result<Json<TranscriptionResponse>, HttpError> {
    let mut model = None;
    let mut audio = None;
    while let Some(field) = form
        .next_field()
        .await
        .map_err(|e| HttpError(forge_types::CoreError::input_invalid(e.to_string())))?
    {
        match field.name().unwrap_or_default() {
            "model" => model = Some(field.text().await.unwrap_or_default()),
            "file" => audio = Some(field.bytes().await.unwrap_or_default()),
            _ => {}
        }
    }
    let model = model.ok_or_else(|| HttpError(forge_types::CoreError::input_invalid("missing 'model' field")))?;
    let model = forge_types::ModelId::new(model).map_err(HttpError::from)?;
    let audio = audio.ok_or_else(|| HttpError(forge_types::CoreError::input_invalid("missing 'file' field")))?;

    let result = state
        .server
        .process_speech_to_text(SpeechToTextArgs { model, audio, options: CompletionOptions::default() })
        .await?;
    Ok(Json(TranscriptionResponse { text: result.text, finish_reason: format!("{:?}", result.finish_reason) }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TranscriptionResponse {
    pub text: String,
    pub finish_reason: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SpeechRequest {
    pub model: String,
    pub text: String,
}

#[utoipa::path(
    post,
    path = "/v1/audio/speech",
    tag = "audio",
    request_body = SpeechRequest,
    responses((status = 200, description = "Synthesized audio bytes", content_type = "application/octet-stream"))
)]
pub async fn speech(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SpeechRequest>,
) -> Result<Response, HttpError> {
    let model = forge_types::ModelId::new(req.model).map_err(HttpError::from)?;
    let result = state
        .server
        .process_text_to_speech(TextToSpeechArgs { model, text: req.text, options: CompletionOptions::default() })
        .await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from(result.audio),
    )
        .into_response())
}
