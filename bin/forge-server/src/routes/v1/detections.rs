//! `POST /v1/detections` — non-standard extension (§6).

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::routing::post;
use axum::{Json, Router};
use forge_types::{Detection, ObjectDetectionArgs};
use serde::Serialize;

use crate::error::HttpError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/detections", post(detections))
}

#[derive(Debug, Serialize)]
pub struct DetectionsResponse {
    pub detections: Vec<Detection>,
}

/// `multipart/form-data` with `model` and `image` fields.
pub async fn detections(
    State(state): State<Arc<AppState>>,
    mut form: Multipart,
) -> Result<Json<DetectionsResponse>, HttpError> {
    let mut model = None;
    let mut image = None;
    while let Some(field) = form
        .next_field()
        .await
        .map_err(|e| HttpError(forge_types::CoreError::input_invalid(e.to_string())))?
    {
        match field.name().unwrap_or_default() {
            "model" => model = Some(field.text().await.unwrap_or_default()),
            "image" => image = Some(field.bytes().await.unwrap_or_default()),
            _ => {}
        }
    }
    let model = model.ok_or_else(|| HttpError(forge_types::CoreError::input_invalid("missing 'model' field")))?;
    let model = forge_types::ModelId::new(model).map_err(HttpError::from)?;
    let image = image.ok_or_else(|| HttpError(forge_types::CoreError::input_invalid("missing 'image' field")))?;

    let result = state.server.process_object_detection(ObjectDetectionArgs { model, image }).await?;
    Ok(Json(DetectionsResponse { detections: result.detections }))
}
