//! Reverse proxy to the user's own application.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, Uri, header},
    response::Response,
};
use tracing::{debug, error};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

const PREVIEW_PREFIX: &str = "/preview";

/// Forward any request under `/preview` to the configured user app, keeping
/// method, headers, body and query.
pub async fn proxy_preview(
    State(state): State<AppState>,
    req: Request<Body>,
) -> ApiResult<Response> {
    let host = &state.config.user_app_host;
    let port = state.config.user_app_port;
    let target = target_uri(host, port, req.uri());
    proxy_request(state.http_client.clone(), req, &target, port).await
}

/// `http://host:port/<path below /preview>?<query>`.
fn target_uri(host: &str, port: u16, original: &Uri) -> String {
    let rest = original
        .path()
        .strip_prefix(PREVIEW_PREFIX)
        .unwrap_or_else(|| original.path());
    let rest = rest.trim_start_matches('/');

    let mut target = format!("http://{host}:{port}/{rest}");
    if let Some(query) = original.query().filter(|q| !q.is_empty()) {
        target.push('?');
        target.push_str(query);
    }
    target
}

async fn proxy_request(
    client: hyper_util::client::legacy::Client<
        hyper_util::client::legacy::connect::HttpConnector,
        Body,
    >,
    mut req: Request<Body>,
    target_uri: &str,
    port: u16,
) -> ApiResult<Response> {
    debug!("Proxying preview request to {}", target_uri);

    let uri: Uri = target_uri.parse().map_err(|e| {
        error!("Invalid target URI {}: {:?}", target_uri, e);
        ApiError::internal(format!("Invalid preview target: {target_uri}"))
    })?;
    *req.uri_mut() = uri;

    if let Some(authority) = req.uri().authority() {
        let value = HeaderValue::from_str(authority.as_str()).map_err(|e| {
            error!("Invalid Host header value {}: {:?}", authority.as_str(), e);
            ApiError::internal("Invalid preview host")
        })?;
        req.headers_mut().insert(header::HOST, value);
    }

    let response = client.request(req).await.map_err(|e| {
        error!("Preview proxy request failed: {:?}", e);
        ApiError::bad_gateway(
            format!(
                "Failed to connect to user application on port {port}. Make sure your app is running."
            ),
            e.to_string(),
        )
    })?;

    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, Body::new(body)))
}
