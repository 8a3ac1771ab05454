//! # API REST
//!
//! REST API for DSR.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI documentation, served at `/api-docs/openapi.json`
//! - REST-specific concerns (caller headers, status mapping, CORS)
//!
//! All release semantics live in `dsr-core`; handlers only translate.

#![warn(rust_2018_idioms)]

pub mod caller;
pub mod error;
pub mod handlers;

use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use dsr_core::ReleaseEngine;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;

pub use caller::{Caller, SUBJECT_HEADER};
pub use error::{ApiError, ErrorBody};

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReleaseEngine>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::list_releases,
        handlers::create_release,
        handlers::get_release,
        handlers::update_release,
        handlers::select,
        handlers::unselect,
        handlers::clear_selection,
        handlers::node_tree,
        handlers::activate,
        handlers::deactivate,
        handlers::activation_history,
        handlers::master_manifest,
        handlers::bucket_key_manifest,
        handlers::gateway_manifest,
        handlers::verify_manifest,
        handlers::fetch_objects,
        handlers::audit_events,
        handlers::egress_sync,
    ),
    components(schemas(
        handlers::HealthRes,
        handlers::VerifyRes,
        handlers::EgressSyncRes,
        ErrorBody,
    ))
)]
pub struct ApiDoc;

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Build the REST router over `engine`.
pub fn router(engine: Arc<ReleaseEngine>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/releases",
            get(handlers::list_releases).post(handlers::create_release),
        )
        .route(
            "/releases/:key",
            get(handlers::get_release).patch(handlers::update_release),
        )
        .route(
            "/releases/:key/selection",
            axum::routing::delete(handlers::clear_selection),
        )
        .route("/releases/:key/selection/select", post(handlers::select))
        .route("/releases/:key/selection/unselect", post(handlers::unselect))
        .route("/releases/:key/tree", get(handlers::node_tree))
        .route(
            "/releases/:key/activation",
            post(handlers::activate).delete(handlers::deactivate),
        )
        .route(
            "/releases/:key/activations",
            get(handlers::activation_history),
        )
        .route("/releases/:key/manifest", get(handlers::master_manifest))
        .route(
            "/releases/:key/manifest/bucket-key",
            get(handlers::bucket_key_manifest),
        )
        .route(
            "/releases/:key/manifest/gateway",
            get(handlers::gateway_manifest),
        )
        .route(
            "/releases/:key/manifest/verify",
            get(handlers::verify_manifest),
        )
        .route("/releases/:key/objects", get(handlers::fetch_objects))
        .route("/releases/:key/audit", get(handlers::audit_events))
        .route("/releases/:key/egress-sync", post(handlers::egress_sync))
        .route("/api-docs/openapi.json", get(openapi))
        .layer(CorsLayer::permissive())
        .with_state(AppState { engine })
}
