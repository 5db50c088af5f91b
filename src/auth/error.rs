//! Auth error taxonomy and its HTTP mapping.
//!
//! Every variant carries a stable string code; clients branch on it, so the
//! strings must not change.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Username and password are required")]
    MissingCredentials,
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Account is disabled")]
    AccountDisabled,
    #[error("Two-factor authentication code required")]
    TotpRequired,
    #[error("Invalid two-factor authentication code")]
    TotpInvalid,
    #[error("No pending two-factor enrollment, run setup again")]
    TotpNotPending,
    #[error("Two-factor authentication is already enabled")]
    TotpAlreadyEnabled,
    #[error("Malformed token")]
    TokenMalformed,
    #[error("Token signature invalid")]
    TokenSignatureInvalid,
    #[error("Token expired")]
    TokenExpired,
    #[error("User no longer exists or is disabled")]
    IdentityRevoked,
    #[error("Missing authorization token")]
    MissingToken,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Authentication required")]
    Unauthenticated,
    #[error("Insufficient permissions")]
    InsufficientPermissions { required: String },
    #[error("Insufficient role")]
    InsufficientRole { required: String, current: String },
    #[error("{message}")]
    RateLimitExceeded { retry_after: u64, message: String },
    #[error("Password must be at least 8 characters")]
    WeakPassword,
    #[error("User not found")]
    UserNotFound,
    #[error("Stored credential is corrupt")]
    CorruptCredential,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials => "MISSING_CREDENTIALS",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::AccountDisabled => "ACCOUNT_DISABLED",
            AuthError::TotpRequired => "TOTP_REQUIRED",
            AuthError::TotpInvalid => "TOTP_INVALID",
            AuthError::TotpNotPending => "TOTP_NOT_PENDING",
            AuthError::TotpAlreadyEnabled => "TOTP_ALREADY_ENABLED",
            AuthError::TokenMalformed => "TOKEN_MALFORMED",
            AuthError::TokenSignatureInvalid => "TOKEN_SIGNATURE_INVALID",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::IdentityRevoked => "IDENTITY_REVOKED",
            AuthError::MissingToken => "MISSING_TOKEN",
            AuthError::InvalidToken => "INVALID_TOKEN",
            AuthError::Unauthenticated => "UNAUTHENTICATED",
            AuthError::InsufficientPermissions { .. } => "INSUFFICIENT_PERMISSIONS",
            AuthError::InsufficientRole { .. } => "INSUFFICIENT_ROLE",
            AuthError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            AuthError::WeakPassword => "WEAK_PASSWORD",
            AuthError::UserNotFound => "USER_NOT_FOUND",
            AuthError::CorruptCredential | AuthError::Store(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials
            | AuthError::AccountDisabled
            | AuthError::TotpRequired
            | AuthError::TotpInvalid
            | AuthError::TokenMalformed
            | AuthError::TokenSignatureInvalid
            | AuthError::TokenExpired
            | AuthError::IdentityRevoked
            | AuthError::MissingToken
            | AuthError::InvalidToken
            | AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AuthError::InsufficientPermissions { .. } | AuthError::InsufficientRole { .. } => {
                StatusCode::FORBIDDEN
            }
            AuthError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::MissingCredentials
            | AuthError::TotpNotPending
            | AuthError::WeakPassword => StatusCode::BAD_REQUEST,
            AuthError::TotpAlreadyEnabled => StatusCode::CONFLICT,
            AuthError::UserNotFound => StatusCode::NOT_FOUND,
            AuthError::CorruptCredential | AuthError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Token-level failures that collapse into `InvalidToken` at the gate.
    pub fn is_token_failure(&self) -> bool {
        matches!(
            self,
            AuthError::TokenMalformed
                | AuthError::TokenSignatureInvalid
                | AuthError::TokenExpired
                | AuthError::IdentityRevoked
        )
    }

    /// Server-side faults that an operator has to look at.
    pub fn is_server_fault(&self) -> bool {
        matches!(self, AuthError::CorruptCredential | AuthError::Store(_))
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        if self.is_server_fault() {
            error!(code, error = %self, "Auth subsystem fault");
            let body = json!({ "error": "Internal server error", "code": code });
            return (status, Json(body)).into_response();
        }

        let mut body = json!({ "error": self.to_string(), "code": code });
        match &self {
            AuthError::InsufficientPermissions { required } => {
                body["required"] = json!(required);
            }
            AuthError::InsufficientRole { required, current } => {
                body["required"] = json!(required);
                body["current"] = json!(current);
            }
            AuthError::RateLimitExceeded { retry_after, .. } => {
                body["retryAfter"] = json!(retry_after);
            }
            _ => {}
        }

        let mut response = (status, Json(body)).into_response();
        if let AuthError::RateLimitExceeded { retry_after, .. } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
