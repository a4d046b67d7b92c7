/// Forwarding of validated requests to the single configured upstream.
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};

use super::transform;
use crate::errors::AppError;

/// An inbound request as it should be replayed upstream.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// Path plus query string of the original request.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// What the upstream answered. Relayed to the caller unchanged.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, request: ForwardRequest) -> Result<UpstreamResponse, AppError>;
}

/// HTTP client for the resource server. The upstream credential replaces
/// whatever `authorization` the caller sent.
pub struct HttpForwarder {
    client: reqwest::Client,
    base_url: String,
    credential: HeaderValue,
}

impl HttpForwarder {
    pub fn new(base_url: &str, credential: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(32)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {}", e))?;

        let mut credential = HeaderValue::from_str(credential)
            .map_err(|_| anyhow::anyhow!("resource server token is not a valid header value"))?;
        credential.set_sensitive(true);

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            credential,
        })
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, request: ForwardRequest) -> Result<UpstreamResponse, AppError> {
        let url = transform::rewrite_url(&self.base_url, &request.path_and_query);

        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid method: {}", e)))?;

        let mut builder = self
            .client
            .request(method, &url)
            .headers(transform::upstream_headers(&request.headers, &self.credential));
        if transform::carries_body(&request.method) {
            builder = builder.body(request.body);
        }

        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                tracing::warn!("Upstream request timed out: {}", e);
                AppError::UpstreamTimeout
            } else {
                AppError::Upstream(e.to_string())
            }
        })?;

        let status = resp.status();
        let content_type = resp.headers().get(reqwest::header::CONTENT_TYPE).cloned();
        let body = resp
            .bytes()
            .await
            .map_err(|e| AppError::Upstream(format!("upstream body read failed: {}", e)))?;

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}
