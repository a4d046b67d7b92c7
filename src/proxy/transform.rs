/// URL rewriting and header mutation for upstream requests, plus extraction
/// of the caller's identity and session cookie.
use std::net::SocketAddr;

use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::Method;

/// Cookie carrying the plain token value.
pub const SESSION_COOKIE: &str = "session_token";

/// Headers that describe the inbound connection rather than the request.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn rewrite_url(upstream_base: &str, original_path: &str) -> String {
    format!("{}{}", upstream_base.trim_end_matches('/'), original_path)
}

/// Identity of the remote end of the connection, as `ip:port`.
pub fn client_identity(addr: SocketAddr) -> String {
    format!("{}:{}", addr.ip(), addr.port())
}

/// Value of the session cookie, if any `Cookie` header carries a non-empty one.
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| name.trim() == SESSION_COOKIE)
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// `Set-Cookie` value handing `value` to the client.
pub fn session_set_cookie(value: &str) -> Result<HeaderValue, header::InvalidHeaderValue> {
    HeaderValue::from_str(&format!("{}={}; Path=/", SESSION_COOKIE, value))
}

/// Original headers minus connection-level ones, with `authorization`
/// replaced by the upstream credential. `accept-encoding` is dropped so the
/// outbound client negotiates and decodes compression itself, and the caller
/// always receives an identity-encoded body.
pub fn upstream_headers(original: &HeaderMap, credential: &HeaderValue) -> HeaderMap {
    let mut headers = original.clone();
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::ACCEPT_ENCODING);
    headers.insert(header::AUTHORIZATION, credential.clone());
    headers
}

/// Only these methods forward a request body.
pub fn carries_body(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_url() {
        assert_eq!(
            rewrite_url("https://api.example.com/", "/v1/items?limit=5"),
            "https://api.example.com/v1/items?limit=5"
        );
        assert_eq!(rewrite_url("http://localhost:8080", "/"), "http://localhost:8080/");
    }

    #[test]
    fn test_client_identity_formats() {
        assert_eq!(
            client_identity("203.0.113.9:41000".parse().unwrap()),
            "203.0.113.9:41000"
        );
        assert_eq!(client_identity("[::1]:8080".parse().unwrap()), "::1:8080");
    }

    #[test]
    fn test_session_cookie_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_cookie(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; lang=en"));
        assert_eq!(session_cookie(&headers), None);

        headers.append(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session_token=abc-123_x"),
        );
        assert_eq!(session_cookie(&headers).as_deref(), Some("abc-123_x"));
    }

    #[test]
    fn test_empty_session_cookie_is_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("session_token="));
        assert_eq!(session_cookie(&headers), None);
    }

    #[test]
    fn test_set_cookie_value() {
        let v = session_set_cookie("abc").unwrap();
        assert_eq!(v.to_str().unwrap(), "session_token=abc; Path=/");
    }

    #[test]
    fn test_upstream_headers_replace_authorization() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer client"));
        headers.insert(header::HOST, HeaderValue::from_static("bridge.local"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip, br"));

        let out = upstream_headers(&headers, &HeaderValue::from_static("Bearer upstream"));
        assert_eq!(out.get(header::AUTHORIZATION).unwrap(), "Bearer upstream");
        assert_eq!(out.get(header::ACCEPT).unwrap(), "application/json");
        assert!(out.get(header::HOST).is_none());
        assert!(out.get(header::CONNECTION).is_none());
        assert!(out.get(header::CONTENT_LENGTH).is_none());
        assert!(out.get(header::ACCEPT_ENCODING).is_none());
    }

    #[test]
    fn test_upstream_headers_add_missing_authorization() {
        let out = upstream_headers(&HeaderMap::new(), &HeaderValue::from_static("token"));
        assert_eq!(out.get(header::AUTHORIZATION).unwrap(), "token");
    }

    #[test]
    fn test_carries_body() {
        assert!(carries_body(&Method::POST));
        assert!(carries_body(&Method::PUT));
        assert!(carries_body(&Method::PATCH));
        assert!(carries_body(&Method::DELETE));
        assert!(!carries_body(&Method::GET));
        assert!(!carries_body(&Method::HEAD));
        assert!(!carries_body(&Method::OPTIONS));
    }
}
