use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue};
use axum::routing::{get, post};
use axum::{middleware, Router};
use tower::ServiceBuilder;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::auth::require_admin_token;
use crate::handlers::{
    decrypt_form_handler, decrypt_handler, generate_handler, health_handler, logs_handler,
    multilinks_handler,
};
use crate::models::SharedState;

/// Slack on top of the two file parts for the text fields and multipart framing.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn build_router(state: SharedState) -> Router {
    let body_limit = state
        .config
        .max_upload_bytes
        .saturating_mul(2)
        .saturating_add(FORM_OVERHEAD_BYTES);

    let decrypt = Router::new()
        .route("/decrypt", get(decrypt_form_handler).post(decrypt_handler))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ));

    let admin = Router::new()
        .route("/api/logs", get(logs_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin_token));

    // Retained uploads are client data: download only, never rendered in our origin.
    let files = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static("sandbox"),
        ))
        .service(ServeDir::new(&state.config.files_dir));

    Router::new()
        .route("/generate", post(generate_handler))
        .route("/multilinks", get(multilinks_handler))
        .route("/health", get(health_handler))
        .merge(decrypt)
        .merge(admin)
        .nest_service("/files", files)
        .fallback_service(ServeDir::new(&state.config.static_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
