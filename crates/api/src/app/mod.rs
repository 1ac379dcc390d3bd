//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, access gate, streamer and job runner
//! - `jobs.rs`: job types served by this binary
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::config::AppConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod jobs;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build services and the router on top of them.
///
/// The caller owns the returned services and should call
/// [`AppServices::shutdown`] once the server stops.
pub async fn build_app(config: &AppConfig) -> anyhow::Result<(Router, Arc<AppServices>)> {
    let services = Arc::new(services::build_services(config).await?);
    Ok((router(services.clone()), services))
}

pub fn router(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .route("/health/store", get(routes::system::store_health))
        .merge(routes::router())
        .layer(
            ServiceBuilder::new()
                .layer(Extension(services))
                .layer(axum::middleware::from_fn(middleware::credentials_middleware)),
        )
}
