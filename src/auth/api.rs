//! Authentication API Endpoints
//! Mission: Login, account security, and audit endpoints

use crate::auth::{
    authenticator::Authenticator,
    error::AuthError,
    models::{
        AuditEntry, ChangePasswordRequest, Claims, EnableTwoFactorRequest, LoginRequest,
        LoginResponse, MessageResponse, TwoFactorSetupResponse, UserResponse, VerifyResponse,
    },
};
use crate::middleware::rate_limit::client_address;
use anyhow::anyhow;
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Query, State},
    http::HeaderMap,
    Extension, Json,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const DEFAULT_LOG_LIMIT: usize = 100;

/// bcrypt is deliberately slow; keep it off the async workers.
async fn run_blocking<T, F>(f: F) -> Result<T, AuthError>
where
    F: FnOnce() -> Result<T, AuthError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AuthError::Store(anyhow!("auth task failed: {e}")))?
}

fn caller_id(claims: &Claims) -> Result<Uuid, AuthError> {
    claims.user_id().ok_or(AuthError::InvalidToken)
}

/// Login endpoint - POST /api/auth/login
pub async fn login(
    State(auth): State<Arc<Authenticator>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AuthError> {
    let Json(payload) = payload.map_err(|e| {
        debug!(error = %e, "Unreadable login body");
        AuthError::MissingCredentials
    })?;
    if payload.username.trim().is_empty() || payload.password.is_empty() {
        return Err(AuthError::MissingCredentials);
    }
    info!("🔐 Login attempt: {}", payload.username);

    let ip = client_address(&headers, connect.map(|ConnectInfo(addr)| addr));
    let response = run_blocking(move || {
        auth.authenticate_from(
            &payload.username,
            &payload.password,
            payload.totp_code.as_deref(),
            ip.as_deref(),
        )
    })
    .await?;

    Ok(Json(response))
}

/// Current user - GET /api/auth/me
pub async fn get_current_user(
    State(auth): State<Arc<Authenticator>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserResponse>, AuthError> {
    let user = auth.load_user(caller_id(&claims)?)?;
    Ok(Json(UserResponse::from_user(&user)))
}

/// Token check - GET /api/auth/verify
pub async fn verify_token(Extension(claims): Extension<Claims>) -> Json<VerifyResponse> {
    Json(VerifyResponse {
        valid: true,
        user: claims,
    })
}

/// Logout - POST /api/auth/logout
///
/// Tokens are stateless; the client drops its copy.
pub async fn logout(Extension(claims): Extension<Claims>) -> Json<MessageResponse> {
    info!("👋 Logout: {}", claims.username);
    Json(MessageResponse::ok("Logged out"))
}

/// Begin TOTP enrollment - POST /api/auth/2fa/setup
pub async fn setup_two_factor(
    State(auth): State<Arc<Authenticator>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<TwoFactorSetupResponse>, AuthError> {
    let setup = auth.setup_two_factor(caller_id(&claims)?)?;
    Ok(Json(setup))
}

/// Confirm TOTP enrollment - POST /api/auth/2fa/enable
pub async fn enable_two_factor(
    State(auth): State<Arc<Authenticator>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<EnableTwoFactorRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    auth.enable_two_factor(caller_id(&claims)?, &payload.code)?;
    Ok(Json(MessageResponse::ok("Two-factor authentication enabled")))
}

/// Turn TOTP off - POST /api/auth/2fa/disable
pub async fn disable_two_factor(
    State(auth): State<Arc<Authenticator>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MessageResponse>, AuthError> {
    auth.disable_two_factor(caller_id(&claims)?)?;
    Ok(Json(MessageResponse::ok("Two-factor authentication disabled")))
}

/// POST /api/auth/change-password
pub async fn change_password(
    State(auth): State<Arc<Authenticator>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    let id = caller_id(&claims)?;
    run_blocking(move || auth.change_password(id, &payload.old_password, &payload.new_password))
        .await?;
    Ok(Json(MessageResponse::ok("Password changed")))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

/// Recent login attempts - GET /api/auth/logs (manage_users)
pub async fn get_auth_logs(
    State(auth): State<Arc<Authenticator>>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<AuditEntry>>, AuthError> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, 1000);
    Ok(Json(auth.auth_logs(limit)?))
}

/// List all users - GET /api/admin/users (admin role)
pub async fn list_users(
    State(auth): State<Arc<Authenticator>>,
) -> Result<Json<Vec<UserResponse>>, AuthError> {
    Ok(Json(auth.list_users()?))
}
