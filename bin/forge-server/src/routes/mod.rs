//! Axum router construction.
//!
//! [`build`] assembles the complete application router: CORS, the health
//! route, the OpenAI-compatible `/v1` routes, and an optional Swagger UI —
//! same composition shape as `slab-server::routes::build`.

mod health;
pub mod doc;
mod v1;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::AppState;

pub fn build(state: Arc<AppState>) -> Router {
    let cors = match &state.cors_allowed_origins {
        Some(origins_str) => {
            let origins: Vec<axum::http::HeaderValue> =
                origins_str.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_headers(Any).allow_methods(Any)
            } else {
                CorsLayer::new().allow_origin(origins).allow_headers(Any).allow_methods(Any)
            }
        }
        None => CorsLayer::new().allow_origin(Any).allow_headers(Any).allow_methods(Any),
    };

    let api_router = Router::new().merge(health::router()).nest("/v1", v1::router());

    let mut app = Router::new().merge(api_router);

    if state.enable_swagger {
        let api_doc = doc::get_docs();
        app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api_doc));
    }

    app.layer(TraceLayer::new_for_http()).layer(cors).with_state(state)
}
