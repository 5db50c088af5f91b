//! License Storage
//! Mission: Persist license keys behind a swappable trait

use crate::licenses::models::{License, LicenseStatus, NewLicense};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

pub trait LicenseStore: Send + Sync {
    fn list(&self) -> Result<Vec<License>>;
    fn find_by_key(&self, license_key: &str) -> Result<Option<License>>;
    fn insert(&self, license: NewLicense) -> Result<License>;
    /// Extends expiry and reactivates. `None` if the key is unknown.
    fn renew(
        &self,
        license_key: &str,
        expire_date: DateTime<Utc>,
        max_users: Option<u32>,
    ) -> Result<Option<License>>;
    /// `None` if the key is unknown.
    fn disable(&self, license_key: &str) -> Result<Option<License>>;
    /// Removes the row. `false` if the key is unknown.
    fn delete(&self, license_key: &str) -> Result<bool>;
}

const LICENSE_COLUMNS: &str = "id, license_key, customer_name, customer_email, expire_date, \
     max_users, status, created_at, renewed_at, disabled_at";

pub struct SqliteLicenseStore {
    db_path: String,
}

impl SqliteLicenseStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_string(),
        };
        store.init_db()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.db_path)
            .with_context(|| format!("Failed to open license database at {}", self.db_path))
    }

    fn init_db(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS licenses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                license_key TEXT UNIQUE NOT NULL,
                customer_name TEXT NOT NULL,
                customer_email TEXT NOT NULL DEFAULT '',
                expire_date TEXT NOT NULL,
                max_users INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                renewed_at TEXT,
                disabled_at TEXT
            )",
            [],
        )?;
        Ok(())
    }

    fn row_to_license(row: &Row<'_>) -> rusqlite::Result<License> {
        let status: String = row.get(6)?;
        let status = LicenseStatus::from_str(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                format!("unknown license status {status}").into(),
            )
        })?;

        Ok(License {
            id: row.get(0)?,
            license_key: row.get(1)?,
            customer_name: row.get(2)?,
            customer_email: row.get(3)?,
            expire_date: parse_time(row, 4)?,
            max_users: row.get(5)?,
            status,
            created_at: parse_time(row, 7)?,
            renewed_at: parse_optional_time(row, 8)?,
            disabled_at: parse_optional_time(row, 9)?,
        })
    }

    fn load(&self, conn: &Connection, license_key: &str) -> Result<Option<License>> {
        let license = conn
            .query_row(
                &format!("SELECT {LICENSE_COLUMNS} FROM licenses WHERE license_key = ?1"),
                params![license_key],
                Self::row_to_license,
            )
            .optional()
            .context("Failed to load license")?;
        Ok(license)
    }
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_optional_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(_) => parse_time(row, idx).map(Some),
    }
}

impl LicenseStore for SqliteLicenseStore {
    fn list(&self) -> Result<Vec<License>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {LICENSE_COLUMNS} FROM licenses ORDER BY id"
        ))?;
        let licenses = stmt
            .query_map([], Self::row_to_license)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(licenses)
    }

    fn find_by_key(&self, license_key: &str) -> Result<Option<License>> {
        let conn = self.connect()?;
        self.load(&conn, license_key)
    }

    fn insert(&self, license: NewLicense) -> Result<License> {
        let conn = self.connect()?;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO licenses (license_key, customer_name, customer_email, expire_date,
                                   max_users, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                license.license_key,
                license.customer_name,
                license.customer_email,
                license.expire_date.to_rfc3339(),
                license.max_users,
                LicenseStatus::Active.as_str(),
                now.to_rfc3339(),
            ],
        )
        .context("Failed to insert license")?;

        info!("✅ License created: {}", license.license_key);

        self.load(&conn, &license.license_key)?
            .context("License missing right after insert")
    }

    fn renew(
        &self,
        license_key: &str,
        expire_date: DateTime<Utc>,
        max_users: Option<u32>,
    ) -> Result<Option<License>> {
        let conn = self.connect()?;
        let updated = conn
            .execute(
                "UPDATE licenses
                 SET expire_date = ?2,
                     max_users = COALESCE(?3, max_users),
                     status = 'active',
                     renewed_at = ?4
                 WHERE license_key = ?1",
                params![
                    license_key,
                    expire_date.to_rfc3339(),
                    max_users,
                    Utc::now().to_rfc3339()
                ],
            )
            .context("Failed to renew license")?;

        if updated == 0 {
            return Ok(None);
        }
        info!("✅ License renewed: {}", license_key);
        self.load(&conn, license_key)
    }

    fn disable(&self, license_key: &str) -> Result<Option<License>> {
        let conn = self.connect()?;
        let updated = conn
            .execute(
                "UPDATE licenses SET status = 'disabled', disabled_at = ?2 WHERE license_key = ?1",
                params![license_key, Utc::now().to_rfc3339()],
            )
            .context("Failed to disable license")?;

        if updated == 0 {
            return Ok(None);
        }
        info!("🛑 License disabled: {}", license_key);
        self.load(&conn, license_key)
    }

    fn delete(&self, license_key: &str) -> Result<bool> {
        let conn = self.connect()?;
        let removed = conn
            .execute(
                "DELETE FROM licenses WHERE license_key = ?1",
                params![license_key],
            )
            .context("Failed to delete license")?;

        if removed > 0 {
            info!("🗑️ License deleted: {}", license_key);
        }
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::licenses::models::generate_license_key;
    use chrono::Duration;
    use tempfile::NamedTempFile;

    fn create_test_store() -> (SqliteLicenseStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let store = SqliteLicenseStore::new(temp_file.path().to_str().unwrap()).unwrap();
        (store, temp_file)
    }

    fn new_license(days: i64) -> NewLicense {
        NewLicense {
            license_key: generate_license_key(),
            customer_name: "Acme".to_string(),
            customer_email: "ops@acme.test".to_string(),
            expire_date: Utc::now() + Duration::days(days),
            max_users: 10,
        }
    }

    #[test]
    fn test_insert_and_find() {
        let (store, _temp) = create_test_store();
        let created = store.insert(new_license(30)).unwrap();

        assert_eq!(created.status, LicenseStatus::Active);
        let found = store.find_by_key(&created.license_key).unwrap().unwrap();
        assert_eq!(found.customer_name, "Acme");
        assert_eq!(store.list().unwrap().len(), 1);
        assert!(store.find_by_key("ADS-NOPE").unwrap().is_none());
    }

    #[test]
    fn test_disable_then_renew_reactivates() {
        let (store, _temp) = create_test_store();
        let created = store.insert(new_license(30)).unwrap();

        let disabled = store.disable(&created.license_key).unwrap().unwrap();
        assert_eq!(disabled.status, LicenseStatus::Disabled);
        assert!(disabled.disabled_at.is_some());

        let new_expiry = Utc::now() + Duration::days(400);
        let renewed = store
            .renew(&created.license_key, new_expiry, None)
            .unwrap()
            .unwrap();
        assert_eq!(renewed.status, LicenseStatus::Active);
        assert_eq!(renewed.max_users, 10);
        assert!(renewed.renewed_at.is_some());
    }

    #[test]
    fn test_unknown_key_updates() {
        let (store, _temp) = create_test_store();
        assert!(store.disable("ADS-NOPE").unwrap().is_none());
        assert!(store.renew("ADS-NOPE", Utc::now(), Some(5)).unwrap().is_none());
        assert!(!store.delete("ADS-NOPE").unwrap());
    }

    #[test]
    fn test_delete_removes_row() {
        let (store, _temp) = create_test_store();
        let kept = store.insert(new_license(30)).unwrap();
        let doomed = store.insert(new_license(30)).unwrap();

        assert!(store.delete(&doomed.license_key).unwrap());
        assert!(store.find_by_key(&doomed.license_key).unwrap().is_none());
        assert!(!store.delete(&doomed.license_key).unwrap());

        let left = store.list().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].license_key, kept.license_key);
    }
}
