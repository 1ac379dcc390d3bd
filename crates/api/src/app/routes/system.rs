use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::warn;

use crate::app::errors::json_error;
use crate::app::services::AppServices;

pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "backend": services.backend.as_str(),
        "runner": services.runner.stats(),
    }))
}

/// Reachability of the backing store.
pub async fn store_health(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.state.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "backend": services.backend.as_str() })),
        )
            .into_response(),
        Err(err) => {
            warn!(error = %err, "store health check failed");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable", err.to_string())
        }
    }
}
