//! API Bridge: issues per-client session tokens and gates every other request
//! on them before forwarding to a single upstream resource server.

pub mod codec;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod lifecycle;
pub mod models;
pub mod proxy;
pub mod store;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{any, get};
use axum::Router;

use lifecycle::TokenLifecycle;
use proxy::upstream::Forwarder;

/// Shared application state passed to handlers.
pub struct AppState {
    pub lifecycle: TokenLifecycle,
    pub forwarder: Arc<dyn Forwarder>,
}

/// `GET /identity` issues tokens; everything else, including other methods
/// on `/identity`, goes through the gate.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/identity",
            get(proxy::handler::identity_handler).fallback(proxy::handler::gateway_handler),
        )
        .fallback(any(proxy::handler::gateway_handler))
        .with_state(state)
        // Enforce 25 MB body size limit on all routes
        .layer(DefaultBodyLimit::max(25 * 1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id_middleware))
}

/// Middleware: injects a unique X-Request-Id into every response.
/// This allows clients to correlate errors with gateway logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}
