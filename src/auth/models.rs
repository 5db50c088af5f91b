//! Authentication Models
//! Mission: Define user records, token claims, and audit entries

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stored user account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // bcrypt hash - never serialize
    pub role: UserRole,
    pub permissions: Vec<String>,
    pub active: bool,
    pub two_factor_enabled: bool,
    #[serde(skip_serializing)]
    pub totp_secret: Option<String>,
    #[serde(skip_serializing)]
    pub totp_secret_pending: Option<String>,
    pub created_at: String,
    pub last_login: Option<String>,
}

impl User {
    /// Where this account sits in the enrollment state machine.
    pub fn two_factor_state(&self) -> TwoFactorState {
        if self.two_factor_enabled {
            TwoFactorState::Enabled
        } else if self.totp_secret_pending.is_some() {
            TwoFactorState::Pending
        } else {
            TwoFactorState::Disabled
        }
    }
}

/// User roles for RBAC
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum UserRole {
    #[serde(rename = "admin")]
    Admin, // Implicitly holds every permission
    #[serde(rename = "operator")]
    Operator, // Limited to the explicit permission set
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Operator => "operator",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(UserRole::Admin),
            "operator" => Some(UserRole::Operator),
            _ => None,
        }
    }
}

/// TOTP enrollment lifecycle: DISABLED -> PENDING -> ENABLED, and ENABLED -> DISABLED.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TwoFactorState {
    Disabled,
    Pending,
    Enabled,
}

/// JWT Claims payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub sub: String, // subject (user_id)
    pub username: String,
    pub role: UserRole,
    pub permissions: Vec<String>,
    pub iat: usize,
    pub exp: usize, // expiration timestamp
}

impl Claims {
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }

    /// Admins satisfy every permission regardless of the explicit set.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.role == UserRole::Admin || self.permissions.iter().any(|p| p == permission)
    }
}

/// Login request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(default, alias = "totpToken", alias = "totp_token")]
    pub totp_code: Option<String>,
}

/// Login response
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: usize, // seconds until expiration
    pub user: UserResponse,
}

/// User response (sanitized)
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub role: UserRole,
    pub permissions: Vec<String>,
    pub active: bool,
    pub two_factor: TwoFactorState,
    pub created_at: String,
    pub last_login: Option<String>,
}

impl UserResponse {
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            username: user.username.clone(),
            role: user.role,
            permissions: user.permissions.clone(),
            active: user.active,
            two_factor: user.two_factor_state(),
            created_at: user.created_at.clone(),
            last_login: user.last_login.clone(),
        }
    }
}

/// One authentication attempt, successful or not
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub timestamp: String,
    pub username: String,
    pub success: bool,
    pub reason: String,
    pub ip: Option<String>,
}

/// Returned when a user starts TOTP enrollment
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorSetupResponse {
    pub secret: String,
    pub qr_code_url: String,
    pub manual_entry_key: String,
}

#[derive(Debug, Deserialize)]
pub struct EnableTwoFactorRequest {
    #[serde(alias = "verificationCode")]
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(alias = "old_password")]
    pub old_password: String,
    #[serde(alias = "new_password")]
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub user: Claims,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}
