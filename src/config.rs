//! Server configuration from flags and environment.

use crate::auth::{
    jwt::DEFAULT_EXPIRATION_HOURS,
    password::DEFAULT_BCRYPT_COST,
    totp::{DEFAULT_ISSUER, DEFAULT_WINDOW},
};
use crate::middleware::{RateLimitConfig, RateLimitLayer, RateLimiters};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

const DEV_JWT_SECRET: &str = "dev-secret-change-in-production-minimum-32-characters";

#[derive(Parser, Debug, Clone)]
#[command(name = "license-server")]
#[command(about = "License key server with authenticated admin API")]
pub struct Config {
    /// HTTP listen port
    #[arg(long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// Users and audit log database
    #[arg(long, env = "AUTH_DB_PATH", default_value = "license_auth.db")]
    pub auth_db_path: String,

    /// License key database
    #[arg(long, env = "LICENSE_DB_PATH", default_value = "licenses.db")]
    pub license_db_path: String,

    /// HS256 signing secret
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Session token lifetime in hours
    #[arg(long, env = "TOKEN_TTL_HOURS", default_value_t = DEFAULT_EXPIRATION_HOURS)]
    pub token_ttl_hours: i64,

    #[arg(long, env = "TOTP_ISSUER", default_value = DEFAULT_ISSUER)]
    pub totp_issuer: String,

    /// Accepted TOTP drift, in 30s steps either side
    #[arg(long, env = "TOTP_WINDOW", default_value_t = DEFAULT_WINDOW)]
    pub totp_window: u8,

    #[arg(long, env = "BCRYPT_COST", default_value_t = DEFAULT_BCRYPT_COST)]
    pub bcrypt_cost: u32,

    #[arg(long, env = "LOGIN_RATE_MAX", default_value = "5")]
    pub login_rate_max: u32,

    #[arg(long, env = "LOGIN_RATE_WINDOW_SECS", default_value = "900")]
    pub login_rate_window_secs: u64,

    #[arg(long, env = "API_RATE_MAX", default_value = "1000")]
    pub api_rate_max: u32,

    #[arg(long, env = "API_RATE_WINDOW_SECS", default_value = "3600")]
    pub api_rate_window_secs: u64,

    #[arg(long, env = "VALIDATE_RATE_MAX", default_value = "100")]
    pub validate_rate_max: u32,

    #[arg(long, env = "VALIDATE_RATE_WINDOW_SECS", default_value = "900")]
    pub validate_rate_window_secs: u64,

    /// How often expired rate-limit entries are swept
    #[arg(long, env = "RATE_LIMIT_SWEEP_SECS", default_value = "300")]
    pub rate_limit_sweep_secs: u64,
}

impl Config {
    pub fn jwt_secret(&self) -> String {
        match self.jwt_secret.as_deref().map(str::trim) {
            Some(secret) if !secret.is_empty() => secret.to_string(),
            _ => {
                warn!("⚠️  JWT_SECRET not set, using development secret");
                DEV_JWT_SECRET.to_string()
            }
        }
    }

    pub fn rate_limits(&self) -> RateLimiters {
        let policy = |base: RateLimitConfig, max: u32, window_secs: u64| {
            RateLimitLayer::new(base.with_limit(max, Duration::from_secs(window_secs)))
        };

        RateLimiters {
            login: policy(
                RateLimitConfig::login(),
                self.login_rate_max,
                self.login_rate_window_secs,
            ),
            api: policy(
                RateLimitConfig::api(),
                self.api_rate_max,
                self.api_rate_window_secs,
            ),
            validation: policy(
                RateLimitConfig::validation(),
                self.validate_rate_max,
                self.validate_rate_window_secs,
            ),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limit_sweep_secs.max(1))
    }

    pub fn auth_db_path(&self) -> String {
        resolve_data_path(&self.auth_db_path)
    }

    pub fn license_db_path(&self) -> String {
        resolve_data_path(&self.license_db_path)
    }
}

/// Relative paths anchor at the crate directory, not the caller's cwd.
fn resolve_data_path(raw: &str) -> String {
    let p = PathBuf::from(raw.trim());
    if p.is_absolute() {
        return p.to_string_lossy().to_string();
    }
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join(p)
        .to_string_lossy()
        .to_string()
}
