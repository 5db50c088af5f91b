//! License Models

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

pub const DEFAULT_EXPIRE_DAYS: i64 = 365;
pub const MAX_EXPIRE_DAYS: i64 = 36_500;
pub const DEFAULT_MAX_USERS: u32 = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LicenseStatus {
    Active,
    Disabled,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Active => "active",
            LicenseStatus::Disabled => "disabled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(LicenseStatus::Active),
            "disabled" => Some(LicenseStatus::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct License {
    pub id: i64,
    pub license_key: String,
    pub customer_name: String,
    pub customer_email: String,
    pub expire_date: DateTime<Utc>,
    pub max_users: u32,
    pub status: LicenseStatus,
    pub created_at: DateTime<Utc>,
    pub renewed_at: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
}

impl License {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expire_date
    }
}

/// `ADS-` followed by 16 upper-case hex characters.
pub fn generate_license_key() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("ADS-{}", hex::encode_upper(bytes))
}

/// A license row not yet stored
#[derive(Debug, Clone)]
pub struct NewLicense {
    pub license_key: String,
    pub customer_name: String,
    pub customer_email: String,
    pub expire_date: DateTime<Utc>,
    pub max_users: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddLicenseRequest {
    pub customer_name: String,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub expire_days: Option<i64>,
    #[serde(default)]
    pub max_users: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewLicenseRequest {
    pub license_key: String,
    pub new_expire_date: DateTime<Utc>,
    #[serde(default)]
    pub new_max_users: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseKeyRequest {
    pub license_key: String,
}

#[derive(Debug, Serialize)]
pub struct LicenseListResponse {
    pub licenses: Vec<LicenseView>,
    pub total: usize,
}

/// A license plus its computed expiry flag
#[derive(Debug, Serialize)]
pub struct LicenseView {
    #[serde(flatten)]
    pub license: License,
    pub is_expired: bool,
}

#[derive(Debug, Serialize)]
pub struct ValidationResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<License>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_license_key_format() {
        let key = generate_license_key();
        assert!(key.starts_with("ADS-"));
        assert_eq!(key.len(), 20);
        assert!(key[4..]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        assert_ne!(key, generate_license_key());
    }

    #[test]
    fn test_status_round_trip() {
        assert_eq!(LicenseStatus::from_str("active"), Some(LicenseStatus::Active));
        assert_eq!(LicenseStatus::Disabled.as_str(), "disabled");
        assert_eq!(LicenseStatus::from_str("expired"), None);
    }
}
