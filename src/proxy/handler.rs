use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use super::transform;
use super::upstream::{ForwardRequest, UpstreamResponse};
use crate::errors::AppError;
use crate::AppState;

/// `GET /identity`: issues a session token bound to the caller's address.
#[tracing::instrument(skip(state, connect_info))]
pub async fn identity_handler(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Result<Response, AppError> {
    let identity = connect_info.map(|ConnectInfo(addr)| transform::client_identity(addr));
    let token = state.lifecycle.issue(identity.as_deref()).await?;

    let cookie = transform::session_set_cookie(&token.value)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid session cookie: {}", e)))?;

    Ok((StatusCode::CREATED, [(header::SET_COOKIE, cookie)]).into_response())
}

/// Every other request: validate the session token, then forward or reject.
#[tracing::instrument(skip(state, connect_info, headers, body), fields(req_id = %uuid::Uuid::new_v4()))]
pub async fn gateway_handler(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let identity = connect_info.map(|ConnectInfo(addr)| transform::client_identity(addr));
    let presented = transform::session_cookie(&headers);

    let status = state
        .lifecycle
        .status(identity.as_deref(), presented.as_deref())
        .await?;
    tracing::debug!(status = status.as_str(), "resolved token status");
    status.into_result()?;

    // VALID implies a credential was presented.
    let Some(presented) = presented else {
        return Err(AppError::CredentialAbsent);
    };

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());

    let upstream = state
        .forwarder
        .forward(ForwardRequest {
            method,
            path_and_query,
            headers,
            body,
        })
        .await?;

    // Accounting runs detached; its failure must not touch the response.
    let lifecycle = state.lifecycle.clone();
    tokio::spawn(async move {
        if let Err(e) = lifecycle.record_use(&presented).await {
            tracing::error!("failed to record token usage: {:#}", e);
        }
    });

    Ok(relay(upstream))
}

fn relay(upstream: UpstreamResponse) -> Response {
    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = upstream.status;
    if let Some(content_type) = upstream.content_type {
        response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn test_relay_preserves_status_body_and_content_type() {
        let resp = relay(UpstreamResponse {
            status: StatusCode::IM_A_TEAPOT,
            content_type: Some(HeaderValue::from_static("text/plain")),
            body: Bytes::from_static(b"short and stout"),
        });
        assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "text/plain");
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"short and stout");
    }

    #[tokio::test]
    async fn test_relay_without_content_type() {
        let resp = relay(UpstreamResponse {
            status: StatusCode::NO_CONTENT,
            content_type: None,
            body: Bytes::new(),
        });
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(resp.headers().get(header::CONTENT_TYPE).is_none());
    }
}
