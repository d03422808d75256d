use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use utoipa::openapi::OpenApi;

pub const OPENAPI_PATH: &str = "/v1/openapi.json";

/// Serve the merged OpenAPI document as JSON.
pub fn json_route(spec: Arc<OpenApi>) -> Router {
    Router::new().route(
        OPENAPI_PATH,
        get(move || {
            let spec = spec.clone();
            async move { Json(spec.as_ref().clone()) }
        }),
    )
}
