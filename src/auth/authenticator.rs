//! Authenticator
//! Mission: Login flow, token verification, and account security state
//!
//! Token verification re-reads the identity from the credential store on
//! every call, so a deactivated account is rejected before its token expires.

use crate::auth::{
    audit::AuditSink,
    error::AuthError,
    jwt::JwtHandler,
    models::{AuditEntry, Claims, LoginResponse, TwoFactorSetupResponse, User, UserResponse},
    password::{PasswordVerifier, MIN_PASSWORD_LEN},
    totp::TotpEngine,
    user_store::CredentialStore,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-user mutexes so two writes to the same record never interleave.
#[derive(Default)]
struct IdentityLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl IdentityLocks {
    fn for_user(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.locks.lock().entry(id).or_default().clone()
    }
}

pub struct Authenticator {
    store: Arc<dyn CredentialStore>,
    audit: Arc<dyn AuditSink>,
    jwt: Arc<JwtHandler>,
    totp: TotpEngine,
    passwords: PasswordVerifier,
    locks: IdentityLocks,
    /// Hash checked for unknown usernames so misses cost the same as hits.
    decoy_hash: OnceLock<String>,
}

impl Authenticator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        audit: Arc<dyn AuditSink>,
        jwt: Arc<JwtHandler>,
        totp: TotpEngine,
        passwords: PasswordVerifier,
    ) -> Self {
        Self {
            store,
            audit,
            jwt,
            totp,
            passwords,
            locks: IdentityLocks::default(),
            decoy_hash: OnceLock::new(),
        }
    }

    pub fn authenticate(
        &self,
        username: &str,
        password: &str,
        totp_code: Option<&str>,
    ) -> Result<LoginResponse, AuthError> {
        self.authenticate_from(username, password, totp_code, None)
    }

    /// Full login. Every call, whatever the outcome, appends exactly one audit entry.
    pub fn authenticate_from(
        &self,
        username: &str,
        password: &str,
        totp_code: Option<&str>,
        client_ip: Option<&str>,
    ) -> Result<LoginResponse, AuthError> {
        let result = self.try_authenticate(username, password, totp_code);

        match &result {
            Ok(response) => {
                info!(
                    "✅ Login successful: {} ({})",
                    username,
                    response.user.role.as_str()
                );
                self.record_attempt(username, true, "success", client_ip);
            }
            Err(e) => {
                if e.is_server_fault() {
                    warn!(username, error = %e, "Login aborted by server fault");
                } else {
                    info!(username, code = e.code(), "❌ Failed login attempt");
                }
                self.record_attempt(username, false, &e.to_string(), client_ip);
            }
        }

        result
    }

    fn try_authenticate(
        &self,
        username: &str,
        password: &str,
        totp_code: Option<&str>,
    ) -> Result<LoginResponse, AuthError> {
        // Unknown user and wrong password are the same error, at the same cost
        let Some(user) = self.store.find_by_username(username)? else {
            self.burn_password_check(password);
            return Err(AuthError::InvalidCredentials);
        };

        if !self.passwords.verify(password, &user.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }

        if !user.active {
            return Err(AuthError::AccountDisabled);
        }

        if user.two_factor_enabled {
            let code = totp_code
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .ok_or(AuthError::TotpRequired)?;
            let secret = user
                .totp_secret
                .as_deref()
                .ok_or(AuthError::CorruptCredential)?;

            if !self.totp.verify_code(secret, code, self.totp.window()) {
                return Err(AuthError::TotpInvalid);
            }
        }

        let (token, expires_in) = self.jwt.generate_token(&user)?;

        let user = match self.touch_last_login(user.id) {
            Ok(Some(updated)) => updated,
            Ok(None) => user,
            Err(e) => {
                warn!(username, error = %e, "Failed to record last login");
                user
            }
        };

        Ok(LoginResponse {
            token,
            expires_in,
            user: UserResponse::from_user(&user),
        })
    }

    fn burn_password_check(&self, password: &str) {
        let decoy = self.decoy_hash.get_or_init(|| {
            self.passwords
                .hash("decoy-password-never-matches")
                .unwrap_or_default()
        });
        if !decoy.is_empty() {
            let _ = self.passwords.verify(password, decoy);
        }
    }

    fn touch_last_login(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        let lock = self.locks.for_user(id);
        let _guard = lock.lock();

        let Some(mut user) = self.store.find_by_id(&id)? else {
            return Ok(None);
        };
        user.last_login = Some(Utc::now().to_rfc3339());
        self.store.save(&user)?;
        Ok(Some(user))
    }

    fn record_attempt(&self, username: &str, success: bool, reason: &str, ip: Option<&str>) {
        let entry = AuditEntry {
            timestamp: Utc::now().to_rfc3339(),
            username: username.to_string(),
            success,
            reason: reason.to_string(),
            ip: ip.map(str::to_string),
        };

        if let Err(e) = self.audit.append(entry) {
            warn!(username, error = %e, "Failed to write auth audit entry");
        }
    }

    /// Signature, expiry, then a live check that the identity still exists and is active.
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = self.jwt.validate_token(token)?;
        self.ensure_identity_active(&claims)?;
        Ok(claims)
    }

    pub fn ensure_identity_active(&self, claims: &Claims) -> Result<(), AuthError> {
        let id = claims.user_id().ok_or(AuthError::TokenMalformed)?;
        match self.store.find_by_id(&id)? {
            Some(user) if user.active => Ok(()),
            _ => {
                debug!(username = %claims.username, "Token refers to a revoked identity");
                Err(AuthError::IdentityRevoked)
            }
        }
    }

    pub fn load_user(&self, id: Uuid) -> Result<User, AuthError> {
        self.store.find_by_id(&id)?.ok_or(AuthError::UserNotFound)
    }

    pub fn list_users(&self) -> Result<Vec<UserResponse>, AuthError> {
        let users = self.store.list()?;
        Ok(users.iter().map(UserResponse::from_user).collect())
    }

    /// Load, mutate, and save one user while holding its identity lock.
    fn update_user<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut User) -> Result<Option<T>, AuthError>,
    ) -> Result<Option<T>, AuthError> {
        let lock = self.locks.for_user(id);
        let _guard = lock.lock();

        let mut user = self.load_user(id)?;
        let out = f(&mut user)?;
        if out.is_some() {
            self.store.save(&user)?;
        }
        Ok(out)
    }

    /// DISABLED/PENDING -> PENDING. A repeated setup replaces the pending secret.
    pub fn setup_two_factor(&self, id: Uuid) -> Result<TwoFactorSetupResponse, AuthError> {
        let response = self.update_user(id, |user| {
            if user.two_factor_enabled {
                return Err(AuthError::TotpAlreadyEnabled);
            }
            let enrollment = self.totp.generate_secret(&user.username)?;
            user.totp_secret_pending = Some(enrollment.secret.clone());

            info!(username = %user.username, "🔐 TOTP enrollment started");
            Ok(Some(TwoFactorSetupResponse {
                manual_entry_key: enrollment.secret.clone(),
                secret: enrollment.secret,
                qr_code_url: enrollment.enrollment_uri,
            }))
        })?;

        response.ok_or(AuthError::UserNotFound)
    }

    /// PENDING -> ENABLED. A wrong code leaves the pending secret in place.
    pub fn enable_two_factor(&self, id: Uuid, code: &str) -> Result<(), AuthError> {
        self.update_user(id, |user| {
            let pending = user
                .totp_secret_pending
                .clone()
                .ok_or(AuthError::TotpNotPending)?;

            if !self.totp.verify_code(&pending, code, self.totp.window()) {
                return Err(AuthError::TotpInvalid);
            }

            user.two_factor_enabled = true;
            user.totp_secret = Some(pending);
            user.totp_secret_pending = None;

            info!(username = %user.username, "✅ TOTP enabled");
            Ok(Some(()))
        })?;
        Ok(())
    }

    /// Any state -> DISABLED. Already disabled is a successful no-op.
    pub fn disable_two_factor(&self, id: Uuid) -> Result<(), AuthError> {
        self.update_user(id, |user| {
            if !user.two_factor_enabled
                && user.totp_secret.is_none()
                && user.totp_secret_pending.is_none()
            {
                return Ok(None::<()>);
            }

            user.two_factor_enabled = false;
            user.totp_secret = None;
            user.totp_secret_pending = None;

            info!(username = %user.username, "TOTP disabled");
            Ok(Some(()))
        })?;
        Ok(())
    }

    pub fn change_password(
        &self,
        id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        self.update_user(id, |user| {
            if !self.passwords.verify(old_password, &user.password_hash)? {
                return Err(AuthError::InvalidCredentials);
            }
            if new_password.chars().count() < MIN_PASSWORD_LEN {
                return Err(AuthError::WeakPassword);
            }

            user.password_hash = self.passwords.hash(new_password)?;
            info!(username = %user.username, "🔑 Password changed");
            Ok(Some(()))
        })?;
        Ok(())
    }

    /// Newest first.
    pub fn auth_logs(&self, limit: usize) -> Result<Vec<AuditEntry>, AuthError> {
        Ok(self.audit.read_recent(limit)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::audit::{MemoryAuditLog, MAX_AUDIT_ENTRIES};
    use crate::auth::models::{TwoFactorState, UserRole};
    use crate::auth::totp::TOTP_STEP;
    use crate::auth::user_store::{seed_default_users, MemoryUserStore};

    struct Fixture {
        auth: Authenticator,
        store: Arc<MemoryUserStore>,
        audit: Arc<MemoryAuditLog>,
        totp: TotpEngine,
    }

    fn fixture() -> Fixture {
        let passwords = PasswordVerifier::new(4);
        let store = Arc::new(MemoryUserStore::new());
        seed_default_users(store.as_ref(), &passwords).unwrap();
        let audit = Arc::new(MemoryAuditLog::new());
        let jwt = Arc::new(JwtHandler::new("test-secret-key-12345".to_string()));
        let totp = TotpEngine::default();

        let auth = Authenticator::new(
            store.clone(),
            audit.clone(),
            jwt,
            totp.clone(),
            passwords,
        );
        Fixture {
            auth,
            store,
            audit,
            totp,
        }
    }

    fn user_id(f: &Fixture, username: &str) -> Uuid {
        f.store.find_by_username(username).unwrap().unwrap().id
    }

    fn current_code(f: &Fixture, secret: &str) -> String {
        let now = Utc::now().timestamp() as u64;
        f.totp.generate_code_at(secret, now).unwrap()
    }

    /// A code from well outside the tolerance window.
    fn stale_code(f: &Fixture, secret: &str) -> String {
        let past = Utc::now().timestamp() as u64 - 10 * TOTP_STEP;
        f.totp.generate_code_at(secret, past).unwrap()
    }

    fn enroll(f: &Fixture, username: &str) -> String {
        let id = user_id(f, username);
        let setup = f.auth.setup_two_factor(id).unwrap();
        f.auth
            .enable_two_factor(id, &current_code(f, &setup.secret))
            .unwrap();
        setup.secret
    }

    #[test]
    fn test_admin_login_issues_admin_token() {
        let f = fixture();
        let response = f.auth.authenticate("admin", "admin123", None).unwrap();

        assert_eq!(response.user.username, "admin");
        let claims = f.auth.verify_token(&response.token).unwrap();
        assert_eq!(claims.username, "admin");
        assert_eq!(claims.role, UserRole::Admin);
        assert!(claims.has_permission("delete"));
    }

    #[test]
    fn test_login_updates_last_login() {
        let f = fixture();
        let response = f
            .auth
            .authenticate("operator", "operator123", None)
            .unwrap();
        assert!(response.user.last_login.is_some());

        let stored = f.store.find_by_username("operator").unwrap().unwrap();
        assert!(stored.last_login.is_some());
    }

    #[test]
    fn test_unknown_user_and_wrong_password_are_indistinguishable() {
        let f = fixture();
        let unknown = f.auth.authenticate("ghost", "admin123", None).unwrap_err();
        let wrong = f.auth.authenticate("admin", "wrong", None).unwrap_err();

        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[test]
    fn test_disabled_account_rejected() {
        let f = fixture();
        let mut operator = f.store.find_by_username("operator").unwrap().unwrap();
        operator.active = false;
        f.store.save(&operator).unwrap();

        let err = f
            .auth
            .authenticate("operator", "operator123", None)
            .unwrap_err();
        assert!(matches!(err, AuthError::AccountDisabled));
    }

    #[test]
    fn test_corrupt_hash_is_server_fault() {
        let f = fixture();
        let mut operator = f.store.find_by_username("operator").unwrap().unwrap();
        operator.password_hash = "garbage".to_string();
        f.store.save(&operator).unwrap();

        let err = f
            .auth
            .authenticate("operator", "operator123", None)
            .unwrap_err();
        assert!(matches!(err, AuthError::CorruptCredential));
        assert_eq!(f.audit.len(), 1);
    }

    #[test]
    fn test_two_factor_required_and_checked() {
        let f = fixture();
        let secret = enroll(&f, "operator");

        let err = f
            .auth
            .authenticate("operator", "operator123", None)
            .unwrap_err();
        assert!(matches!(err, AuthError::TotpRequired));

        let err = f
            .auth
            .authenticate("operator", "operator123", Some("  "))
            .unwrap_err();
        assert!(matches!(err, AuthError::TotpRequired));

        let err = f
            .auth
            .authenticate("operator", "operator123", Some(&stale_code(&f, &secret)))
            .unwrap_err();
        assert!(matches!(err, AuthError::TotpInvalid));

        let ok = f
            .auth
            .authenticate("operator", "operator123", Some(&current_code(&f, &secret)));
        assert!(ok.is_ok());
    }

    #[test]
    fn test_wrong_password_checked_before_totp() {
        let f = fixture();
        enroll(&f, "operator");

        let err = f.auth.authenticate("operator", "nope", None).unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[test]
    fn test_enrollment_state_machine() {
        let f = fixture();
        let id = user_id(&f, "operator");

        let setup = f.auth.setup_two_factor(id).unwrap();
        assert_eq!(setup.secret, setup.manual_entry_key);
        assert!(setup.qr_code_url.starts_with("otpauth://totp/"));
        let user = f.auth.load_user(id).unwrap();
        assert_eq!(user.two_factor_state(), TwoFactorState::Pending);

        // Failed confirmation keeps the pending secret
        let err = f
            .auth
            .enable_two_factor(id, &stale_code(&f, &setup.secret))
            .unwrap_err();
        assert!(matches!(err, AuthError::TotpInvalid));
        let user = f.auth.load_user(id).unwrap();
        assert_eq!(user.totp_secret_pending.as_deref(), Some(setup.secret.as_str()));

        f.auth
            .enable_two_factor(id, &current_code(&f, &setup.secret))
            .unwrap();
        let user = f.auth.load_user(id).unwrap();
        assert_eq!(user.two_factor_state(), TwoFactorState::Enabled);
        assert_eq!(user.totp_secret.as_deref(), Some(setup.secret.as_str()));
        assert!(user.totp_secret_pending.is_none());

        let err = f.auth.setup_two_factor(id).unwrap_err();
        assert!(matches!(err, AuthError::TotpAlreadyEnabled));

        f.auth.disable_two_factor(id).unwrap();
        let user = f.auth.load_user(id).unwrap();
        assert_eq!(user.two_factor_state(), TwoFactorState::Disabled);
        assert!(user.totp_secret.is_none());
    }

    #[test]
    fn test_confirm_without_pending_fails() {
        let f = fixture();
        let id = user_id(&f, "operator");

        let err = f.auth.enable_two_factor(id, "123456").unwrap_err();
        assert!(matches!(err, AuthError::TotpNotPending));
        assert!(!f.auth.load_user(id).unwrap().two_factor_enabled);
    }

    #[test]
    fn test_confirm_with_replaced_pending_secret_fails() {
        let f = fixture();
        let id = user_id(&f, "operator");

        let first = f.auth.setup_two_factor(id).unwrap();
        let _second = f.auth.setup_two_factor(id).unwrap();

        let err = f
            .auth
            .enable_two_factor(id, &current_code(&f, &first.secret))
            .unwrap_err();
        assert!(matches!(err, AuthError::TotpInvalid));
        assert!(!f.auth.load_user(id).unwrap().two_factor_enabled);
    }

    #[test]
    fn test_disable_when_disabled_is_noop() {
        let f = fixture();
        let id = user_id(&f, "operator");
        let before = f.auth.load_user(id).unwrap();

        f.auth.disable_two_factor(id).unwrap();
        f.auth.disable_two_factor(id).unwrap();

        assert_eq!(f.auth.load_user(id).unwrap(), before);
    }

    #[test]
    fn test_unknown_identity_for_enrollment() {
        let f = fixture();
        let err = f.auth.setup_two_factor(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, AuthError::UserNotFound));
    }

    #[test]
    fn test_token_rejected_after_deactivation() {
        let f = fixture();
        let response = f
            .auth
            .authenticate("operator", "operator123", None)
            .unwrap();
        assert!(f.auth.verify_token(&response.token).is_ok());

        let mut operator = f.store.find_by_username("operator").unwrap().unwrap();
        operator.active = false;
        f.store.save(&operator).unwrap();

        let err = f.auth.verify_token(&response.token).unwrap_err();
        assert!(matches!(err, AuthError::IdentityRevoked));
    }

    #[test]
    fn test_change_password() {
        let f = fixture();
        let id = user_id(&f, "operator");

        let err = f
            .auth
            .change_password(id, "wrong", "new-password-1")
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        let err = f
            .auth
            .change_password(id, "operator123", "short")
            .unwrap_err();
        assert!(matches!(err, AuthError::WeakPassword));

        f.auth
            .change_password(id, "operator123", "new-password-1")
            .unwrap();
        assert!(f
            .auth
            .authenticate("operator", "operator123", None)
            .is_err());
        assert!(f
            .auth
            .authenticate("operator", "new-password-1", None)
            .is_ok());
    }

    #[test]
    fn test_unknown_user_runs_a_decoy_hash_check() {
        let f = fixture();
        assert!(f.auth.decoy_hash.get().is_none());

        let err = f.auth.authenticate("ghost", "whatever", None).unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        let decoy = f.auth.decoy_hash.get().unwrap();
        assert!(decoy.starts_with("$2"));
        assert!(!f.auth.passwords.verify("whatever", decoy).unwrap());
    }

    #[test]
    fn test_concurrent_enrollment_and_password_change_keep_both_updates() {
        for _ in 0..20 {
            let f = fixture();
            let id = user_id(&f, "operator");
            let setup = f.auth.setup_two_factor(id).unwrap();
            let code = current_code(&f, &setup.secret);

            std::thread::scope(|scope| {
                scope.spawn(|| {
                    f.auth
                        .change_password(id, "operator123", "rotated-password")
                        .unwrap()
                });
                scope.spawn(|| f.auth.enable_two_factor(id, &code).unwrap());
            });

            let user = f.store.find_by_id(&id).unwrap().unwrap();
            assert!(user.two_factor_enabled);
            assert_eq!(user.totp_secret.as_deref(), Some(setup.secret.as_str()));
            assert!(user.totp_secret_pending.is_none());
            assert!(f
                .auth
                .passwords
                .verify("rotated-password", &user.password_hash)
                .unwrap());
        }
    }

    #[test]
    fn test_every_attempt_audited_once() {
        let f = fixture();
        enroll(&f, "operator");

        let _ = f.auth.authenticate("admin", "admin123", None);
        let _ = f.auth.authenticate("admin", "wrong", None);
        let _ = f.auth.authenticate("ghost", "x", None);
        let _ = f.auth.authenticate("operator", "operator123", None);
        assert_eq!(f.audit.len(), 4);

        let logs = f.auth.auth_logs(10).unwrap();
        assert_eq!(logs[0].username, "operator");
        assert!(!logs[0].success);
        assert_eq!(logs[0].reason, AuthError::TotpRequired.to_string());
        assert_eq!(logs[3].username, "admin");
        assert!(logs[3].success);
        assert_eq!(logs[3].reason, "success");
    }

    #[test]
    fn test_audit_never_exceeds_bound() {
        let f = fixture();
        for _ in 0..(MAX_AUDIT_ENTRIES + 25) {
            let _ = f
                .auth
                .authenticate_from("ghost", "x", None, Some("10.0.0.1"));
        }
        assert_eq!(f.audit.len(), MAX_AUDIT_ENTRIES);
        assert_eq!(
            f.auth.auth_logs(1).unwrap()[0].ip.as_deref(),
            Some("10.0.0.1")
        );
    }
}
