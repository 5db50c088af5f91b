//! License API Endpoints
//! Mission: Issue, renew, disable, and validate license keys

use crate::licenses::{
    models::{
        generate_license_key, AddLicenseRequest, License, LicenseKeyRequest, LicenseListResponse,
        LicenseStatus, LicenseView, NewLicense, RenewLicenseRequest, ValidationResponse,
        DEFAULT_EXPIRE_DAYS, DEFAULT_MAX_USERS, MAX_EXPIRE_DAYS,
    },
    store::LicenseStore,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum LicenseError {
    #[error("{0}")]
    InvalidRequest(&'static str),

    #[error("License not found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl LicenseError {
    pub fn code(&self) -> &'static str {
        match self {
            LicenseError::InvalidRequest(_) => "INVALID_REQUEST",
            LicenseError::NotFound => "LICENSE_NOT_FOUND",
            LicenseError::Store(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for LicenseError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            LicenseError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            LicenseError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            LicenseError::Store(e) => {
                error!("License store failure: {e:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message, "code": self.code() }))).into_response()
    }
}

type Store = State<Arc<dyn LicenseStore>>;

fn require_key(key: &str) -> Result<&str, LicenseError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(LicenseError::InvalidRequest("License key is required"));
    }
    Ok(key)
}

fn expiry_after(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>, LicenseError> {
    if days > MAX_EXPIRE_DAYS {
        return Err(LicenseError::InvalidRequest("expireDays out of range"));
    }
    Duration::try_days(days)
        .and_then(|d| now.checked_add_signed(d))
        .ok_or(LicenseError::InvalidRequest("expireDays out of range"))
}

/// List licenses - GET /api/licenses (read)
pub async fn list_licenses(
    State(store): Store,
) -> Result<Json<LicenseListResponse>, LicenseError> {
    let now = Utc::now();
    let licenses: Vec<LicenseView> = store
        .list()?
        .into_iter()
        .map(|license| LicenseView {
            is_expired: license.is_expired_at(now),
            license,
        })
        .collect();

    Ok(Json(LicenseListResponse {
        total: licenses.len(),
        licenses,
    }))
}

/// Issue a new key - POST /api/licenses/add (write)
pub async fn add_license(
    State(store): Store,
    Json(payload): Json<AddLicenseRequest>,
) -> Result<Json<License>, LicenseError> {
    let customer_name = payload.customer_name.trim();
    if customer_name.is_empty() {
        return Err(LicenseError::InvalidRequest("Customer name is required"));
    }

    let days = payload
        .expire_days
        .filter(|d| *d > 0)
        .unwrap_or(DEFAULT_EXPIRE_DAYS);
    let expire_date = expiry_after(Utc::now(), days)?;
    let license = store.insert(NewLicense {
        license_key: generate_license_key(),
        customer_name: customer_name.to_string(),
        customer_email: payload.customer_email.unwrap_or_default(),
        expire_date,
        max_users: payload
            .max_users
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_USERS),
    })?;

    Ok(Json(license))
}

/// Extend a key - POST /api/licenses/renew (write)
pub async fn renew_license(
    State(store): Store,
    Json(payload): Json<RenewLicenseRequest>,
) -> Result<Json<License>, LicenseError> {
    let key = require_key(&payload.license_key)?;
    let license = store
        .renew(key, payload.new_expire_date, payload.new_max_users)?
        .ok_or(LicenseError::NotFound)?;
    Ok(Json(license))
}

/// Revoke a key - POST /api/licenses/disable (delete)
pub async fn disable_license(
    State(store): Store,
    Json(payload): Json<LicenseKeyRequest>,
) -> Result<Json<License>, LicenseError> {
    let key = require_key(&payload.license_key)?;
    let license = store.disable(key)?.ok_or(LicenseError::NotFound)?;
    Ok(Json(license))
}

/// Remove a key for good - DELETE /api/licenses/delete (write)
pub async fn delete_license(
    State(store): Store,
    Json(payload): Json<LicenseKeyRequest>,
) -> Result<Json<serde_json::Value>, LicenseError> {
    let key = require_key(&payload.license_key)?;
    if !store.delete(key)? {
        return Err(LicenseError::NotFound);
    }
    Ok(Json(json!({
        "success": true,
        "message": "License deleted",
        "licenseKey": key,
    })))
}

/// Public check - POST /api/licenses/validate
pub async fn validate_license(
    State(store): Store,
    Json(payload): Json<LicenseKeyRequest>,
) -> Result<Json<ValidationResponse>, LicenseError> {
    let key = require_key(&payload.license_key)?;
    let verdict = evaluate(store.find_by_key(key)?, Utc::now());

    if !verdict.valid {
        info!(
            key,
            reason = verdict.reason.as_deref().unwrap_or(""),
            "License rejected"
        );
    }
    Ok(Json(verdict))
}

fn evaluate(license: Option<License>, now: DateTime<Utc>) -> ValidationResponse {
    let rejected = |reason: &str| ValidationResponse {
        valid: false,
        reason: Some(reason.to_string()),
        license: None,
    };

    match license {
        None => rejected("License not found"),
        Some(l) if l.status == LicenseStatus::Disabled => rejected("License disabled"),
        Some(l) if l.is_expired_at(now) => rejected("License expired"),
        Some(l) => ValidationResponse {
            valid: true,
            reason: None,
            license: Some(l),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn license(status: LicenseStatus, expires_in_days: i64) -> License {
        let now = Utc::now();
        License {
            id: 1,
            license_key: "ADS-0011223344556677".to_string(),
            customer_name: "Acme".to_string(),
            customer_email: String::new(),
            expire_date: now + Duration::days(expires_in_days),
            max_users: 10,
            status,
            created_at: now,
            renewed_at: None,
            disabled_at: None,
        }
    }

    #[test]
    fn test_evaluate_reasons() {
        let now = Utc::now();

        let unknown = evaluate(None, now);
        assert!(!unknown.valid);
        assert_eq!(unknown.reason.as_deref(), Some("License not found"));

        let disabled = evaluate(Some(license(LicenseStatus::Disabled, 30)), now);
        assert_eq!(disabled.reason.as_deref(), Some("License disabled"));

        let expired = evaluate(Some(license(LicenseStatus::Active, -1)), now);
        assert_eq!(expired.reason.as_deref(), Some("License expired"));

        let ok = evaluate(Some(license(LicenseStatus::Active, 30)), now);
        assert!(ok.valid);
        assert!(ok.reason.is_none());
        assert!(ok.license.is_some());
    }

    #[test]
    fn test_disabled_wins_over_expired() {
        let verdict = evaluate(Some(license(LicenseStatus::Disabled, -5)), Utc::now());
        assert_eq!(verdict.reason.as_deref(), Some("License disabled"));
    }

    #[test]
    fn test_blank_key_rejected() {
        assert!(matches!(
            require_key("   "),
            Err(LicenseError::InvalidRequest(_))
        ));
        assert_eq!(require_key(" ADS-1 ").unwrap(), "ADS-1");
    }

    #[test]
    fn test_expiry_bounds() {
        let now = Utc::now();
        assert_eq!(expiry_after(now, 30).unwrap(), now + Duration::days(30));
        assert!(expiry_after(now, MAX_EXPIRE_DAYS).is_ok());
        for days in [MAX_EXPIRE_DAYS + 1, 1_000_000_000, i64::MAX] {
            assert!(matches!(
                expiry_after(now, days),
                Err(LicenseError::InvalidRequest("expireDays out of range"))
            ));
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(LicenseError::NotFound.code(), "LICENSE_NOT_FOUND");
        assert_eq!(
            LicenseError::NotFound.into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            LicenseError::InvalidRequest("x").into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }
}
