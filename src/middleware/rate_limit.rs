//! Rate limiting middleware.
//!
//! Fixed-window counters per client, one table per policy. Clients are keyed
//! by authenticated user id when the auth gate ran first, else by address.

use crate::auth::{error::AuthError, models::Claims};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Configuration for rate limiting.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Policy name, for logs.
    pub name: &'static str,
    /// Maximum requests per window.
    pub max_requests: u32,
    /// Window duration.
    pub window: Duration,
    /// Returned to the client when the limit is hit.
    pub message: String,
}

impl RateLimitConfig {
    /// Login endpoints: 5 attempts per 15 minutes.
    pub fn login() -> Self {
        Self {
            name: "login",
            max_requests: 5,
            window: Duration::from_secs(15 * 60),
            message: "Too many login attempts, try again in 15 minutes".to_string(),
        }
    }

    /// Authenticated API: 1000 requests per hour.
    pub fn api() -> Self {
        Self {
            name: "api",
            max_requests: 1000,
            window: Duration::from_secs(60 * 60),
            message: "API rate limit exceeded, try again later".to_string(),
        }
    }

    /// Public license validation: 100 requests per 15 minutes.
    pub fn validation() -> Self {
        Self {
            name: "validation",
            max_requests: 100,
            window: Duration::from_secs(15 * 60),
            message: "Too many validation requests, try again later".to_string(),
        }
    }

    pub fn with_limit(mut self, max_requests: u32, window: Duration) -> Self {
        self.max_requests = max_requests.max(1);
        self.window = window.max(Duration::from_secs(1));
        self
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::api()
    }
}

#[derive(Debug, Clone, Copy)]
struct RateLimitEntry {
    count: u32,
    reset_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResult {
    Allowed { remaining: u32 },
    Exceeded { retry_after: Duration },
}

/// Rate limiter state tracking requests per client.
#[derive(Clone)]
pub struct RateLimitLayer {
    config: Arc<RateLimitConfig>,
    state: Arc<Mutex<HashMap<String, RateLimitEntry>>>,
}

impl RateLimitLayer {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn check(&self, client: &str) -> RateLimitResult {
        self.check_at(client, Instant::now())
    }

    /// Count this request and decide. The count grows even when rejecting,
    /// so hammering a closed window does not reopen it.
    pub fn check_at(&self, client: &str, now: Instant) -> RateLimitResult {
        let mut state = self.state.lock();
        let window = self.config.window;

        let entry = state.entry(client.to_string()).or_insert(RateLimitEntry {
            count: 0,
            reset_at: now + window,
        });

        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + window;
        }

        entry.count = entry.count.saturating_add(1);

        if entry.count > self.config.max_requests {
            RateLimitResult::Exceeded {
                retry_after: entry.reset_at.saturating_duration_since(now),
            }
        } else {
            RateLimitResult::Allowed {
                remaining: self.config.max_requests - entry.count,
            }
        }
    }

    /// Periodic cleanup of expired windows (call from a background task).
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    pub fn cleanup_at(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        let before = state.len();
        state.retain(|_, entry| entry.reset_at > now);
        before - state.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.state.lock().len()
    }

    pub fn reset(&self) {
        self.state.lock().clear();
    }
}

/// The three policies the router applies.
#[derive(Clone)]
pub struct RateLimiters {
    pub login: RateLimitLayer,
    pub api: RateLimitLayer,
    pub validation: RateLimitLayer,
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self {
            login: RateLimitLayer::new(RateLimitConfig::login()),
            api: RateLimitLayer::new(RateLimitConfig::api()),
            validation: RateLimitLayer::new(RateLimitConfig::validation()),
        }
    }
}

impl RateLimiters {
    pub fn all(&self) -> [&RateLimitLayer; 3] {
        [&self.login, &self.api, &self.validation]
    }

    pub fn cleanup(&self) -> usize {
        self.all().iter().map(|l| l.cleanup()).sum()
    }

    pub fn reset(&self) {
        for limiter in self.all() {
            limiter.reset();
        }
    }
}

/// Sweep expired entries every `every`.
pub fn spawn_cleanup(limiters: RateLimiters, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = limiters.cleanup();
            if removed > 0 {
                debug!(removed, "Rate-limit sweep removed expired entries");
            }
        }
    })
}

/// Best-effort network address: proxy headers first, then the socket.
///
/// `X-Forwarded-For` and `X-Real-IP` are taken as given. Exposed directly,
/// a client can pick its own rate-limit bucket by sending them, so run
/// behind a reverse proxy that overwrites both headers.
pub fn client_address(headers: &HeaderMap, socket: Option<SocketAddr>) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    forwarded
        .or(real_ip)
        .map(str::to_string)
        .or_else(|| socket.map(|addr| addr.ip().to_string()))
}

/// Authenticated identity first, else network address.
pub fn client_id(req: &Request) -> String {
    if let Some(claims) = req.extensions().get::<Claims>() {
        return format!("user_{}", claims.sub);
    }

    let socket = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_address(req.headers(), socket).unwrap_or_else(|| "unknown".to_string());
    format!("ip_{ip}")
}

/// Rate limiting middleware function.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimitLayer>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let client = client_id(&request);

    match limiter.check(&client) {
        RateLimitResult::Allowed { .. } => Ok(next.run(request).await),
        RateLimitResult::Exceeded { retry_after } => {
            let retry_after_secs = retry_after.as_millis().div_ceil(1000).max(1) as u64;
            info!(
                client = %client,
                policy = limiter.config().name,
                retry_after_secs,
                "Rate limit exceeded"
            );

            Err(AuthError::RateLimitExceeded {
                retry_after: retry_after_secs,
                message: limiter.config().message.clone(),
            })
        }
    }
}
