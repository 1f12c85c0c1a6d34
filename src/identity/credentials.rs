//! Registration, login and token-to-identity lookup over the user store.
//!
//! Passwords are hashed with Argon2 (PHC string form) before storage.
//! Login failures for an unknown email and a wrong password produce one
//! indistinguishable message so the endpoint cannot be used to enumerate
//! accounts.

use anyhow::anyhow;
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::identity::token::TokenService;
use crate::identity::user::{is_valid_email, normalize_email, PublicUser};
use crate::storage::SharedStore;

const INVALID_CREDENTIALS: &str = "Invalid credentials.";

/// A successful registration or login: the public user plus a freshly
/// minted bearer token.
#[derive(Debug, Clone)]
pub struct AuthSuccess {
    pub user: PublicUser,
    pub token: String,
}

/// Credential operations over the shared store. Every call re-reads the
/// store; nothing about users or credentials is cached in-process.
#[derive(Clone)]
pub struct CredentialStore {
    store: SharedStore,
    tokens: TokenService,
}

fn hash_password(password: &str) -> anyhow::Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!(e.to_string()))?
        .to_string();
    Ok(phc)
}

fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else {
        false
    }
}

impl CredentialStore {
    pub fn new(store: SharedStore, tokens: TokenService) -> Self {
        Self { store, tokens }
    }

    pub fn token_service(&self) -> &TokenService { &self.tokens }

    /// Create a user and mint a token for it.
    ///
    /// Validates email shape, password length and email uniqueness. The
    /// uniqueness check and the insert run under one store lock so two
    /// concurrent registrations for the same address cannot both succeed.
    pub fn register(
        &self,
        name: Option<&str>,
        email: &str,
        password: &str,
    ) -> AppResult<AuthSuccess> {
        let name = name.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        let email = normalize_email(email);

        if email.is_empty() || password.is_empty() {
            return Err(AppError::validation("Email and password are required."));
        }
        if !is_valid_email(&email) {
            return Err(AppError::validation("Invalid email format."));
        }
        if password.len() < 8 {
            return Err(AppError::validation("Password must be at least 8 characters."));
        }
        // Refuse before touching the store; otherwise the row would be
        // created and the token mint would still fail.
        if !self.tokens.secret_configured() {
            return Err(AppError::config("JWT secret is not configured."));
        }

        let password_hash = hash_password(password)
            .map_err(|e| AppError::storage(format!("password hashing failed: {e}")))?;

        let guard = self.store.0.lock();
        if guard.find_user_by_email(&email)?.is_some() {
            return Err(AppError::conflict("Email is already registered."));
        }
        let rec = guard.insert_user(name, email, password_hash)?;
        drop(guard);

        let token = self.tokens.issue(&rec)?;
        info!(target: "techmarket::auth", user_id = rec.id, "register");
        Ok(AuthSuccess { user: rec.into(), token })
    }

    /// Validate credentials and mint a token. Unknown email and wrong
    /// password are deliberately indistinguishable.
    pub fn login(&self, email: &str, password: &str) -> AppResult<AuthSuccess> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(AppError::validation("Email and password are required."));
        }
        if !self.tokens.secret_configured() {
            return Err(AppError::config("JWT secret is not configured."));
        }

        let rec = {
            let guard = self.store.0.lock();
            guard.find_user_by_email(&email)?
        };
        let Some(rec) = rec else {
            return Err(AppError::auth(INVALID_CREDENTIALS));
        };
        if !verify_password(&rec.password_hash, password) {
            return Err(AppError::auth(INVALID_CREDENTIALS));
        }

        let token = self.tokens.issue(&rec)?;
        info!(target: "techmarket::auth", user_id = rec.id, "login");
        Ok(AuthSuccess { user: rec.into(), token })
    }

    /// Resolve a verified token subject to the current user row. Fails as an
    /// authentication error when the row no longer exists, which covers the
    /// deleted-account race for otherwise-valid tokens.
    pub fn lookup(&self, user_id: i64) -> AppResult<PublicUser> {
        let rec = {
            let guard = self.store.0.lock();
            guard.find_user_by_id(user_id)?
        };
        match rec {
            Some(rec) => Ok(rec.into()),
            None => Err(AppError::auth("Invalid or expired token.")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use tempfile::tempdir;

    fn creds(dir: &std::path::Path) -> CredentialStore {
        let store = SharedStore::new(dir).unwrap();
        let tokens = TokenService::new(Some("test-secret".into()), 3600);
        CredentialStore::new(store, tokens)
    }

    #[test]
    fn register_mints_token_for_created_user() {
        let tmp = tempdir().unwrap();
        let c = creds(tmp.path());
        let ok = c.register(Some("Ada"), "Ada@Example.com", "longenough").unwrap();
        assert_eq!(ok.user.email, "ada@example.com");
        assert_eq!(ok.user.name.as_deref(), Some("Ada"));

        let claims = c.token_service().verify(&ok.token).unwrap();
        assert_eq!(claims.sub, ok.user.id);
        assert_eq!(claims.email, "ada@example.com");
    }

    #[test]
    fn register_rejects_bad_input() {
        let tmp = tempdir().unwrap();
        let c = creds(tmp.path());

        let short = c.register(None, "a@b.co", "short").unwrap_err();
        assert_eq!(short.http_status(), 400);
        let bad_email = c.register(None, "not-an-email", "longenough").unwrap_err();
        assert_eq!(bad_email.http_status(), 400);
        let empty = c.register(None, "", "").unwrap_err();
        assert_eq!(empty.http_status(), 400);
    }

    #[test]
    fn duplicate_email_conflicts_even_with_different_case() {
        let tmp = tempdir().unwrap();
        let c = creds(tmp.path());
        c.register(None, "a@b.co", "longenough").unwrap();
        let dup = c.register(None, "  A@B.CO ", "otherpassword").unwrap_err();
        assert!(matches!(dup, AppError::Conflict { .. }));
        assert_eq!(dup.http_status(), 409);
    }

    #[test]
    fn login_succeeds_with_correct_password() {
        let tmp = tempdir().unwrap();
        let c = creds(tmp.path());
        let reg = c.register(None, "a@b.co", "longenough").unwrap();
        let ok = c.login("a@b.co", "longenough").unwrap();
        assert_eq!(ok.user.id, reg.user.id);
        assert!(c.token_service().verify(&ok.token).is_ok());
    }

    #[test]
    fn wrong_password_and_unknown_email_are_indistinguishable() {
        let tmp = tempdir().unwrap();
        let c = creds(tmp.path());
        c.register(None, "a@b.co", "longenough").unwrap();

        let wrong = c.login("a@b.co", "wrongpassword").unwrap_err();
        let unknown = c.login("nobody@b.co", "longenough").unwrap_err();
        assert_eq!(wrong.http_status(), 401);
        assert_eq!(unknown.http_status(), 401);
        assert_eq!(wrong.message(), unknown.message());
    }

    #[test]
    fn lookup_fails_auth_when_row_is_gone() {
        let tmp = tempdir().unwrap();
        let c = creds(tmp.path());
        let reg = c.register(None, "a@b.co", "longenough").unwrap();
        assert_eq!(c.lookup(reg.user.id).unwrap().id, reg.user.id);

        let gone = c.lookup(reg.user.id + 100).unwrap_err();
        assert_eq!(gone.http_status(), 401);
    }

    #[test]
    fn register_without_secret_is_a_config_error() {
        let tmp = tempdir().unwrap();
        let store = SharedStore::new(tmp.path()).unwrap();
        let c = CredentialStore::new(store, TokenService::new(None, 3600));
        let err = c.register(None, "a@b.co", "longenough").unwrap_err();
        assert!(matches!(err, AppError::Config { .. }));
        assert_eq!(err.http_status(), 500);
    }
}
