//! HTTP middleware for the API server
//!
//! Structured request logging and security response headers.

#[cfg(feature = "http-api")]
use axum::{
    extract::{ConnectInfo, Request},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};

#[cfg(feature = "http-api")]
use std::net::{IpAddr, SocketAddr};

/// Peer address of the connection, when the server was started with connect info
#[cfg(feature = "http-api")]
fn extract_client_ip(request: &Request) -> Option<IpAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
}

/// Request logging middleware
///
/// Opens an `http_request` span per request and records the response
/// status, latency and body size on it once the handler completes.
#[cfg(feature = "http-api")]
pub async fn logging_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    use std::time::Instant;
    use tracing::Instrument;

    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip =
        extract_client_ip(&request).unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));

    let span = tracing::info_span!(
        "http_request",
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        status_code = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        response_size = tracing::field::Empty,
    );

    let start_time = Instant::now();
    let response = next.run(request).instrument(span.clone()).await;
    let latency_ms = start_time.elapsed().as_millis() as u64;

    let status_code = response.status();
    let response_size = response
        .headers()
        .get("content-length")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    span.record("status_code", status_code.as_u16());
    span.record("latency_ms", latency_ms);
    span.record("response_size", response_size);

    span.in_scope(|| {
        if status_code.is_server_error() {
            tracing::error!(status_code = status_code.as_u16(), latency_ms, "Request failed");
        } else {
            tracing::info!(
                status_code = status_code.as_u16(),
                latency_ms,
                response_size,
                "Request completed"
            );
        }
    });

    Ok(response)
}

/// Security headers middleware
///
/// Plans and signatures are served as downloads, never rendered.
#[cfg(feature = "http-api")]
pub async fn security_headers_middleware(
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    headers.insert("cache-control", HeaderValue::from_static("no-store"));

    Ok(response)
}
