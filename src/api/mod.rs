//! HTTP API server
//!
//! Versioned read-only surface over the snapshot: search, paper detail,
//! BibTeX, summary proxy, facets, and stats under `/api/v1`, plus `/health`.
//! Errors carry stable machine-readable codes; CORS is an explicit origin
//! allowlist.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::{AllowMethods, AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Error;

pub mod handlers;
pub mod state;
pub mod urls;

pub use state::{ApiState, SharedState};

/// Error wrapper mapping crate errors onto HTTP responses with the
/// `{error, message, details?}` body shape.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = &self.0;
        let status = if err.is_validation() {
            StatusCode::BAD_REQUEST
        } else if err.is_not_found() {
            StatusCode::NOT_FOUND
        } else if matches!(err, Error::OriginNotAllowed(_)) {
            StatusCode::FORBIDDEN
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %err, "request failed");
        }
        let mut body = serde_json::json!({
            "error": err.code(),
            "message": err.to_string(),
        });
        if let Error::TemplateNotAvailable { available, .. } = err {
            body["details"] = serde_json::json!({
                "available_summary_templates": available,
            });
        }
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Build the API router.
pub fn create_router(state: SharedState) -> Router {
    let cors = cors_layer(&state.allowed_origins);
    Router::new()
        .route("/health", get(handlers::health))
        .nest(
            "/api/v1",
            Router::new()
                .route("/search", get(handlers::search))
                .route("/papers/{paper_id}", get(handlers::paper_detail))
                .route("/papers/{paper_id}/bibtex", get(handlers::paper_bibtex))
                .route("/papers/{paper_id}/summary", get(handlers::paper_summary))
                .route("/facets/{kind}", get(handlers::facet_list))
                .route("/facets/{kind}/{id}/papers", get(handlers::facet_papers_by_id))
                .route(
                    "/facets/{kind}/by-value/{value}/papers",
                    get(handlers::facet_papers_by_value),
                )
                .route(
                    "/facets/{kind}/by-value/{value}/stats",
                    get(handlers::facet_value_stats),
                )
                .route("/stats", get(handlers::global_stats))
                .route("/config", get(handlers::runtime_config)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// CORS from the configured allowlist. An empty allowlist (local
/// development) permits any origin; the static host must mirror whatever
/// policy is used here, since the API cannot speak for the CDN.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(Any)
}
