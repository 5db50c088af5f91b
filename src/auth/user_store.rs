//! User Storage
//! Mission: Credential store trait with SQLite and in-memory backends

use crate::auth::models::{User, UserRole};
use crate::auth::password::PasswordVerifier;
use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::RwLock;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

/// The narrow interface the auth core reads and writes user records through.
pub trait CredentialStore: Send + Sync {
    fn find_by_username(&self, username: &str) -> Result<Option<User>>;
    fn find_by_id(&self, id: &Uuid) -> Result<Option<User>>;
    /// Insert or replace the record with `user.id`.
    fn save(&self, user: &User) -> Result<()>;
    fn list(&self) -> Result<Vec<User>>;
}

const USER_COLUMNS: &str = "id, username, password_hash, role, permissions, active, \
     two_factor_enabled, totp_secret, totp_secret_pending, created_at, last_login";

/// User storage with SQLite backend
pub struct UserStore {
    db_path: String,
}

impl UserStore {
    /// Create a new user store and initialize database
    pub fn new(db_path: &str) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_string(),
        };
        store.init_db()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.db_path)
            .with_context(|| format!("Failed to open auth database at {}", self.db_path))
    }

    /// Initialize database schema
    fn init_db(&self) -> Result<()> {
        let conn = self.connect()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                permissions TEXT NOT NULL DEFAULT '[]',
                active INTEGER NOT NULL DEFAULT 1,
                two_factor_enabled INTEGER NOT NULL DEFAULT 0,
                totp_secret TEXT,
                totp_secret_pending TEXT,
                created_at TEXT NOT NULL,
                last_login TEXT
            )",
            [],
        )?;

        Ok(())
    }

    fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
        let id: String = row.get(0)?;
        let id = Uuid::parse_str(&id).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let role_str: String = row.get(3)?;
        let role = UserRole::from_str(&role_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown role {role_str}").into(),
            )
        })?;
        let permissions: String = row.get(4)?;
        let permissions: Vec<String> = serde_json::from_str(&permissions).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(User {
            id,
            username: row.get(1)?,
            password_hash: row.get(2)?,
            role,
            permissions,
            active: row.get(5)?,
            two_factor_enabled: row.get(6)?,
            totp_secret: row.get(7)?,
            totp_secret_pending: row.get(8)?,
            created_at: row.get(9)?,
            last_login: row.get(10)?,
        })
    }
}

impl CredentialStore for UserStore {
    fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.connect()?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                Self::row_to_user,
            )
            .optional()
            .context("Failed to load user by username")?;
        Ok(user)
    }

    fn find_by_id(&self, id: &Uuid) -> Result<Option<User>> {
        let conn = self.connect()?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                Self::row_to_user,
            )
            .optional()
            .context("Failed to load user by id")?;
        Ok(user)
    }

    fn save(&self, user: &User) -> Result<()> {
        let conn = self.connect()?;
        let permissions = serde_json::to_string(&user.permissions)?;

        conn.execute(
            "INSERT INTO users (id, username, password_hash, role, permissions, active,
                                two_factor_enabled, totp_secret, totp_secret_pending,
                                created_at, last_login)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                password_hash = excluded.password_hash,
                role = excluded.role,
                permissions = excluded.permissions,
                active = excluded.active,
                two_factor_enabled = excluded.two_factor_enabled,
                totp_secret = excluded.totp_secret,
                totp_secret_pending = excluded.totp_secret_pending,
                last_login = excluded.last_login",
            params![
                user.id.to_string(),
                user.username,
                user.password_hash,
                user.role.as_str(),
                permissions,
                user.active,
                user.two_factor_enabled,
                user.totp_secret,
                user.totp_secret_pending,
                user.created_at,
                user.last_login,
            ],
        )
        .with_context(|| format!("Failed to save user {}", user.username))?;

        Ok(())
    }

    fn list(&self) -> Result<Vec<User>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at"
        ))?;

        let users = stmt
            .query_map([], Self::row_to_user)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(users)
    }
}

/// Process-local store, used by tests and throwaway deployments.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryUserStore {
    fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    fn find_by_id(&self, id: &Uuid) -> Result<Option<User>> {
        Ok(self.users.read().get(id).cloned())
    }

    fn save(&self, user: &User) -> Result<()> {
        let mut users = self.users.write();
        if users
            .values()
            .any(|u| u.username == user.username && u.id != user.id)
        {
            anyhow::bail!("Username already exists: {}", user.username);
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.users.read().values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(users)
    }
}

/// Build a fresh, active account with 2FA disabled.
pub fn new_user(
    username: &str,
    password_hash: String,
    role: UserRole,
    permissions: &[&str],
) -> User {
    User {
        id: Uuid::new_v4(),
        username: username.to_string(),
        password_hash,
        role,
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
        active: true,
        two_factor_enabled: false,
        totp_secret: None,
        totp_secret_pending: None,
        created_at: Utc::now().to_rfc3339(),
        last_login: None,
    }
}

/// Create the default admin and operator accounts when the store is empty.
pub fn seed_default_users(store: &dyn CredentialStore, passwords: &PasswordVerifier) -> Result<()> {
    if !store.list()?.is_empty() {
        return Ok(());
    }

    let admin = new_user(
        "admin",
        passwords.hash("admin123")?,
        UserRole::Admin,
        &["read", "write", "delete", "manage_users", "manage_licenses"],
    );
    store.save(&admin).context("Failed to insert admin user")?;

    let operator = new_user(
        "operator",
        passwords.hash("operator123")?,
        UserRole::Operator,
        &["read", "write"],
    );
    store
        .save(&operator)
        .context("Failed to insert operator user")?;

    info!("🔐 Default users created (admin/admin123, operator/operator123)");
    warn!("⚠️  CHANGE DEFAULT PASSWORDS IN PRODUCTION!");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_store() -> (UserStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();
        let store = UserStore::new(db_path).unwrap();
        seed_default_users(&store, &PasswordVerifier::new(4)).unwrap();
        (store, temp_file)
    }

    #[test]
    fn test_default_users_created() {
        let (store, _temp) = create_test_store();

        let admin = store.find_by_username("admin").unwrap().unwrap();
        assert_eq!(admin.role, UserRole::Admin);
        assert!(admin.active);
        assert!(!admin.two_factor_enabled);
        assert!(admin.permissions.contains(&"manage_users".to_string()));

        let operator = store.find_by_username("operator").unwrap().unwrap();
        assert_eq!(operator.role, UserRole::Operator);
        assert_eq!(operator.permissions, vec!["read", "write"]);
    }

    #[test]
    fn test_seeding_is_idempotent() {
        let (store, _temp) = create_test_store();
        seed_default_users(&store, &PasswordVerifier::new(4)).unwrap();
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn test_save_round_trips_two_factor_state() {
        let (store, _temp) = create_test_store();

        let mut operator = store.find_by_username("operator").unwrap().unwrap();
        operator.totp_secret_pending = Some("JBSWY3DPEHPK3PXP".to_string());
        operator.last_login = Some(Utc::now().to_rfc3339());
        store.save(&operator).unwrap();

        let loaded = store.find_by_id(&operator.id).unwrap().unwrap();
        assert_eq!(loaded, operator);
    }

    #[test]
    fn test_unknown_user() {
        let (store, _temp) = create_test_store();
        assert!(store.find_by_username("nonexistent").unwrap().is_none());
        assert!(store.find_by_id(&Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let (store, _temp) = create_test_store();
        let dup = new_user("admin", "hash".to_string(), UserRole::Operator, &["read"]);
        assert!(store.save(&dup).is_err());

        let memory = MemoryUserStore::new();
        seed_default_users(&memory, &PasswordVerifier::new(4)).unwrap();
        assert!(memory.save(&dup).is_err());
    }
}
