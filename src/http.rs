//! Response header middleware (DAV compliance and CORS) and client IP helpers.

use axum::body::Body as AxumBody;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, header};
use axum::{middleware, response::Response};
use std::net::IpAddr;

pub const DAV_COMPLIANCE: &str = "1, 2";
pub const ALLOWED_METHODS: &str =
    "GET, HEAD, PUT, DELETE, OPTIONS, PROPFIND, MKCOL, COPY, MOVE, LOCK, UNLOCK";
pub const CORS_ALLOWED_HEADERS: &str =
    "Content-Type, Authorization, Depth, Destination, Overwrite, If, Lock-Token, Timeout";

pub const DAV: HeaderName = HeaderName::from_static("dav");
pub const LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");

/// Adds `DAV` and CORS headers to every response, errors included.
pub async fn add_dav_headers(request: Request<AxumBody>, next: middleware::Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(DAV, HeaderValue::from_static(DAV_COMPLIANCE));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(CORS_ALLOWED_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("DAV, ETag, Lock-Token"),
    );
    response
}

/// Parses the first address in `x-forwarded-for`.
pub fn extract_forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<IpAddr>().ok())
}

/// Prefers the forwarded address over the socket peer.
pub fn resolve_client_ip(headers: &HeaderMap, connect_ip: Option<IpAddr>) -> Option<IpAddr> {
    extract_forwarded_ip(headers).or(connect_ip)
}
