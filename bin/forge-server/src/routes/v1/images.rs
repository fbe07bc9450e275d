//! Image routes: `POST /v1/images/generations`, `/v1/images/edits`,
//! `/v1/images/caption` (non-standard extension, §6).

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::routing::post;
use axum::{Json, Router};
use base64::Engine;
use bytes::Bytes;
use forge_types::{ImageToImageArgs, ImageToTextArgs, TextToImageArgs};
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

use crate::error::HttpError;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(generations))]
pub struct ImagesApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/images/generations", post(generations))
        .route("/images/edits", post(edits))
        .route("/images/caption", post(caption))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GenerationsRequest {
    pub model: String,
    pub prompt: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ImagesResponse {
    /// Base64-encoded image bytes, one per generated/edited image.
    pub images: Vec<String>,
}

#[utoipa::path(
    post,
    path = "/v1/images/generations",
    tag = "images",
    request_body = GenerationsRequest,
    responses((status = 200, description = "Images generated", body = ImagesResponse))
)]
pub async fn generations(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerationsRequest>,
) -> Result<Json<ImagesResponse>, HttpError> {
    let model = forge_types::ModelId::new(req.model).map_err(HttpError::from)?;
    let result = state
        .server
        .process_text_to_image(TextToImageArgs { model, prompt: req.prompt, width: req.width, height: req.height })
        .await?;
    Ok(Json(ImagesResponse { images: result.images.into_iter().map(encode).collect() }))
}

/// `multipart/form-data` with an `image` field and an optional `prompt` field.
pub async fn edits(
    State(state): State<Arc<AppState>>,
    mut form: Multipart,
) -> Result<Json<ImagesResponse>, HttpError> {
    let (model, image, prompt) = read_image_form(&mut form).await?;
    let result = state
        .server
        .process_image_to_image(ImageToImageArgs { model, image, prompt: prompt.unwrap_or_default() })
        .await?;
    Ok(Json(ImagesResponse { images: result.images.into_iter().map(encode).collect() }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CaptionResponse {
    pub text: String,
}

pub async fn caption(
    State(state): State<Arc<AppState>>,
    mut form: Multipart,
) -> Result<Json<CaptionResponse>, HttpError> {
    let (model, image, prompt) = read_image_form(&mut form).await?;
    let result = state.server.process_image_to_text(ImageToTextArgs { model, image, prompt }).await?;
    Ok(Json(CaptionResponse { text: result.text }))
}

async fn read_image_form(
    form: &mut Multipart,
) -> Result<(forge_types::ModelId, Bytes, Option<String>), HttpError> {
    let mut model = None;
    let mut image = None;
    let mut prompt = None;
    while let Some(field) = form
        .next_field()
        .await
        .map_err(|e| HttpError(forge_types::CoreError::input_invalid(e.to_string())))?
    {
        match field.name().unwrap_or_default() {
            "model" => model = Some(field.text().await.unwrap_or_default()),
            "image" => image = Some(field.bytes().await.unwrap_or_default()),
            "prompt" => prompt = Some(field.text().await.unwrap_or_default()),
            _ => {}
        }
    }
    let model = model.ok_or_else(|| HttpError(forge_types::CoreError::input_invalid("missing 'model' field")))?;
    let model = forge_types::ModelId::new(model).map_err(HttpError::from)?;
    let image = image.ok_or_else(|| HttpError(forge_types::CoreError::input_invalid("missing 'image' field")))?;
    Ok((model, image, prompt))
}

fn encode(bytes: Bytes) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
