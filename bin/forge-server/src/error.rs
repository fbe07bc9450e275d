//! HTTP error mapping.
//!
//! Every handler returns `Result<T, HttpError>`; [`IntoResponse`] turns a
//! [`forge_types::CoreError`] into the matching status code and a JSON body,
//! the same "one error type, one `IntoResponse` impl" shape as
//! `slab-server::error::ServerError`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use forge_types::CoreError;
use serde_json::json;

pub struct HttpError(pub CoreError);

impl From<CoreError> for HttpError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::ConfigInvalid { .. }
            | CoreError::InputInvalid { .. }
            | CoreError::EngineUnsupported { .. } => StatusCode::BAD_REQUEST,
            CoreError::ModelNotFound { .. } | CoreError::TaskNotFound { .. } => StatusCode::NOT_FOUND,
            CoreError::Cancelled { .. } => StatusCode::from_u16(499).unwrap(),
            CoreError::TimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
            CoreError::PoolShutdown { .. } => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::PrepareFailed { .. }
            | CoreError::LoadFailed { .. }
            | CoreError::GpuUnavailable { .. }
            | CoreError::Io(_)
            | CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
