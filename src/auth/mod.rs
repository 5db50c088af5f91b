//! Authentication Module
//! Mission: Credential checks, TOTP, signed sessions, and attempt auditing

pub mod api;
pub mod audit;
pub mod authenticator;
pub mod error;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod totp;
pub mod user_store;

pub use audit::{AuditSink, MemoryAuditLog, SqliteAuditLog};
pub use authenticator::Authenticator;
pub use error::AuthError;
pub use jwt::JwtHandler;
pub use middleware::{auth_middleware, require_permission, require_role};
pub use password::PasswordVerifier;
pub use totp::TotpEngine;
pub use user_store::{seed_default_users, CredentialStore, MemoryUserStore, UserStore};
