//! Request logging middleware.
//!
//! Logs every HTTP request with method, path, status code, latency, and the
//! authenticated username when the auth gate ran.

use crate::auth::middleware::AuthenticatedUser;
use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{info, warn};

/// Middleware that logs HTTP requests with timing information.
///
/// INFO for completed requests, WARN for 5xx.
pub async fn request_logging(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    // Skip logging for health checks to reduce noise
    if path == "/health" {
        return next.run(request).await;
    }

    let start = Instant::now();
    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();
    let user = response
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|AuthenticatedUser(name)| name.as_str())
        .unwrap_or("anonymous");

    if status >= 500 {
        warn!(
            method = %method,
            path = %path,
            status = status,
            latency_ms = latency.as_millis(),
            user,
            "Request failed (5xx)"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status = status,
            latency_ms = latency.as_millis(),
            user,
            "Request completed"
        );
    }

    response
}
