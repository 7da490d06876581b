//! API route definitions.

use std::any::Any;

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{
    Json, Router, middleware,
    routing::{any, get},
};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, warn};

use super::error::ApiError;
use super::health;
use super::messages;
use super::preview;
use super::state::{AppState, require_session};
use super::workspace;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Everything under /api needs session credentials.
    let api_routes = Router::new()
        .route(
            "/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route("/workspace/files", get(workspace::list_files))
        .route(
            "/workspace/files/{*path}",
            get(workspace::read_file).put(workspace::write_file),
        )
        .fallback(api_not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    let client_dist = &state.config.client_dist_path;
    let frontend =
        ServeDir::new(client_dist).fallback(ServeFile::new(client_dist.join("index.html")));

    Router::new()
        .route("/health", get(health::health))
        .nest("/api", api_routes)
        .route("/preview", any(preview::proxy_preview))
        .route("/preview/{*path}", any(preview::proxy_preview))
        .fallback_service(frontend)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(cors)
        .layer(trace_layer)
}

async fn api_not_found() -> ApiError {
    ApiError::not_found("Not found")
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let message = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic".to_string()
    };
    error!(panic = %message, "Handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "InternalServerError",
            "code": "INTERNAL_ERROR",
            "message": message,
        })),
    )
        .into_response()
}

/// Build the CORS layer. The only cross-origin caller is the main app.
fn build_cors_layer(state: &AppState) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::PATCH,
        Method::OPTIONS,
    ];

    let headers = [
        header::AUTHORIZATION,
        header::CONTENT_TYPE,
        header::ACCEPT,
        header::ORIGIN,
    ];

    let origin = state.config.main_app_url.trim_end_matches('/');
    match origin.parse::<HeaderValue>() {
        Ok(value) => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(value))
            .allow_methods(methods)
            .allow_headers(headers)
            .allow_credentials(true),
        Err(_) => {
            warn!("CORS: Invalid main app origin: {}", origin);
            CorsLayer::new().allow_origin(AllowOrigin::exact(HeaderValue::from_static("null")))
        }
    }
}
