//! TOTP Engine
//! Mission: Enrollment secrets and RFC 6238 code verification
//!
//! Codes are 6 digits over 30-second steps (SHA-1), which is what authenticator
//! apps expect by default. A valid code may be reused inside its window; there
//! is no used-code cache.

use crate::auth::error::AuthError;
use anyhow::anyhow;
use chrono::Utc;
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::warn;

pub const TOTP_STEP: u64 = 30;
pub const TOTP_DIGITS: usize = 6;
/// Steps accepted either side of the current one (about +/- 60s).
pub const DEFAULT_WINDOW: u8 = 2;
pub const DEFAULT_ISSUER: &str = "License Admin";

/// Fresh enrollment material for one account
#[derive(Debug, Clone)]
pub struct TotpEnrollment {
    pub secret: String,
    pub enrollment_uri: String,
}

#[derive(Debug, Clone)]
pub struct TotpEngine {
    issuer: String,
    window: u8,
}

impl Default for TotpEngine {
    fn default() -> Self {
        Self::new(DEFAULT_ISSUER, DEFAULT_WINDOW)
    }
}

impl TotpEngine {
    pub fn new(issuer: impl Into<String>, window: u8) -> Self {
        Self {
            // ':' separates issuer from account in otpauth labels
            issuer: issuer.into().replace(':', " "),
            window,
        }
    }

    pub fn window(&self) -> u8 {
        self.window
    }

    /// Generate a 160-bit base32 secret and its `otpauth://` provisioning URI.
    pub fn generate_secret(&self, account_label: &str) -> Result<TotpEnrollment, AuthError> {
        let bytes = Secret::generate_secret()
            .to_bytes()
            .map_err(|e| anyhow!("TOTP secret generation failed: {e:?}"))?;
        let totp = self
            .build(bytes, self.window, account_label)
            .map_err(|e| anyhow!("TOTP init error: {e}"))?;

        Ok(TotpEnrollment {
            secret: totp.get_secret_base32(),
            enrollment_uri: totp.get_url(),
        })
    }

    pub fn verify_code(&self, secret: &str, code: &str, window: u8) -> bool {
        self.verify_code_at(secret, code, window, unix_now())
    }

    pub fn verify_code_at(&self, secret: &str, code: &str, window: u8, unix_secs: u64) -> bool {
        let code = code.trim();
        if code.len() != TOTP_DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }

        let Some(totp) = self.for_secret(secret, window) else {
            return false;
        };
        totp.check(code, unix_secs)
    }

    /// The code an authenticator app would show at `unix_secs`.
    pub fn generate_code_at(&self, secret: &str, unix_secs: u64) -> Option<String> {
        self.for_secret(secret, 0)
            .map(|totp| totp.generate(unix_secs))
    }

    fn for_secret(&self, secret: &str, window: u8) -> Option<TOTP> {
        let bytes = match Secret::Encoded(secret.to_string()).to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = ?e, "Stored TOTP secret is not valid base32");
                return None;
            }
        };

        match self.build(bytes, window, "verify") {
            Ok(totp) => Some(totp),
            Err(e) => {
                warn!(error = %e, "Stored TOTP secret rejected");
                None
            }
        }
    }

    fn build(
        &self,
        secret: Vec<u8>,
        window: u8,
        account: &str,
    ) -> Result<TOTP, totp_rs::TotpUrlError> {
        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            window,
            TOTP_STEP,
            secret,
            Some(self.issuer.clone()),
            account.replace(':', "_"),
        )
    }
}

fn unix_now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}
