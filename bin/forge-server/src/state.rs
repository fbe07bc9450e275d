//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use forge_server::InferenceServer;

#[derive(Clone)]
pub struct AppState {
    pub server: Arc<InferenceServer>,
    pub enable_swagger: bool,
    pub cors_allowed_origins: Option<String>,
}
