use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, head, post};
use axum::{Extension, Router};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::commit::{abort_handler, commit_handler};
use crate::api::handlers::fetch::{fetch_download_handler, fetch_probe_handler};
use crate::api::handlers::health::healthz_handler;
use crate::api::handlers::store::store_exists_handler;
use crate::api::handlers::upload::{issue_nonce_handler, start_upload_handler, upload_file_handler};
use crate::server::AppState;

/// Assemble the full router: the upload/commit/abort/fetch/store surface
/// plus the ambient `/healthz` probe, with tracing, panic-catching, CORS,
/// and a body-size cap applied uniformly.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors_layer = if state.config.cors.allow_all_origins {
        CorsLayer::permissive()
    } else {
        let mut layer = CorsLayer::new();
        for origin in &state.config.cors.allowed_origins {
            if let Ok(origin) = origin.parse::<axum::http::HeaderValue>() {
                layer = layer.allow_origin(origin);
            }
        }
        layer
    };

    // `max_dat_body_bytes` bounds only the small root-commitment upload that
    // starts a session; the PUT that streams a blob's bytes is read and
    // hashed incrementally and must not be capped by the same limit, so the
    // service-wide default body limit is disabled and the cap is applied
    // just to that one route instead.
    let max_body = state.config.max_dat_body_bytes;

    Router::new()
        .route("/healthz", get(healthz_handler))
        .route(
            "/upload/:storeId",
            post(start_upload_handler).layer(RequestBodyLimitLayer::new(max_body)),
        )
        .route(
            "/upload/:storeId/:sessionId/*filename",
            head(issue_nonce_handler).put(upload_file_handler),
        )
        .route("/commit/:storeId/:sessionId", post(commit_handler))
        .route("/abort/:storeId/:sessionId", post(abort_handler))
        .route(
            "/fetch/:storeId/:roothash/*dataPath",
            head(fetch_probe_handler),
        )
        .route("/fetch/:storeId/*dataPath", get(fetch_download_handler))
        .route("/:storeId", head(store_exists_handler))
        .layer(Extension(state))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::new())
                .layer(cors_layer)
                .layer(DefaultBodyLimit::disable()),
        )
}
