//! Authentication Middleware
//! Mission: Bearer-token, permission, and role gates for API routes

use crate::auth::{
    authenticator::Authenticator,
    error::AuthError,
    models::{Claims, UserRole},
};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

/// Username of the caller, copied onto the response for request logging.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

/// Auth middleware that validates JWT tokens
pub async fn auth_middleware(
    State(auth): State<Arc<Authenticator>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = bearer_token(req.headers()).ok_or(AuthError::MissingToken)?;

    let claims = auth.verify_token(&token).map_err(|e| {
        if !e.is_token_failure() {
            return e;
        }
        debug!(code = e.code(), "Rejected bearer token");
        AuthError::InvalidToken
    })?;

    let username = claims.username.clone();
    req.extensions_mut().insert(claims);

    let mut response = next.run(req).await;
    response
        .extensions_mut()
        .insert(AuthenticatedUser(username));
    Ok(response)
}

/// `Authorization: Bearer <token>`; anything else counts as no token.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Extract claims from request (use after auth middleware)
pub fn extract_claims(req: &Request) -> Option<&Claims> {
    req.extensions().get::<Claims>()
}

pub fn check_permission(claims: &Claims, permission: &str) -> Result<(), AuthError> {
    if claims.has_permission(permission) {
        Ok(())
    } else {
        Err(AuthError::InsufficientPermissions {
            required: permission.to_string(),
        })
    }
}

pub fn check_role(claims: &Claims, role: UserRole) -> Result<(), AuthError> {
    if claims.role == role {
        Ok(())
    } else {
        Err(AuthError::InsufficientRole {
            required: role.as_str().to_string(),
            current: claims.role.as_str().to_string(),
        })
    }
}

/// Route state for [`require_permission`].
#[derive(Debug, Clone, Copy)]
pub struct RequirePermission(pub &'static str);

/// Route state for [`require_role`].
#[derive(Debug, Clone, Copy)]
pub struct RequireRole(pub UserRole);

pub async fn require_permission(
    State(RequirePermission(permission)): State<RequirePermission>,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let claims = extract_claims(&req).ok_or(AuthError::Unauthenticated)?;
    check_permission(claims, permission)?;
    Ok(next.run(req).await)
}

pub async fn require_role(
    State(RequireRole(role)): State<RequireRole>,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let claims = extract_claims(&req).ok_or(AuthError::Unauthenticated)?;
    check_role(claims, role)?;
    Ok(next.run(req).await)
}
