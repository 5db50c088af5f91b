//! Middleware for observability, hardening, and rate limiting.
//!
//! This module provides:
//! - Request logging with latency tracking
//! - Security response headers
//! - Fixed-window rate limiting per client

pub mod logging;
pub mod rate_limit;
pub mod security_headers;

pub use logging::request_logging;
pub use rate_limit::{
    rate_limit_middleware, spawn_cleanup, RateLimitConfig, RateLimitLayer, RateLimiters,
};
pub use security_headers::security_headers;
