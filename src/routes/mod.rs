use axum::error_handling::HandleErrorLayer;
use axum::routing::{get, post};
use axum::{BoxError, Router};
use tower::buffer::BufferLayer;
use tower::limit::RateLimitLayer;
use tower::load_shed::{error::Overloaded, LoadShedLayer};
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::config::HttpSettings;

pub mod artifacts;
pub mod builds;
pub mod error;
pub mod health;
pub mod metrics;

use error::ApiError;

const SUBMIT_BUFFER: usize = 64;

/// API routes. `/metrics` is mounted separately since it carries its own state.
pub fn router(state: AppState, http: &HttpSettings) -> Router {
    // Requests over the rate are shed immediately rather than queued.
    let submit = post(builds::submit_build).layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(handle_submit_error))
            .layer(BufferLayer::new(SUBMIT_BUFFER))
            .layer(LoadShedLayer::new())
            .layer(RateLimitLayer::new(
                http.submit_rate_limit,
                http.submit_rate_window,
            )),
    );

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/builds", submit)
        .route("/api/v1/builds/{job_id}", get(builds::get_job_status))
        .route(
            "/api/v1/artifacts/{filename}",
            get(artifacts::download_artifact),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(http.max_body_bytes))
}

async fn handle_submit_error(error: BoxError) -> ApiError {
    if error.is::<Overloaded>() {
        ApiError::RateLimited
    } else {
        ApiError::internal(error)
    }
}
