//! Signed bearer token issuance and verification (HS256 JWT).
//!
//! Verification is stateless: validity is decided by the signature and the
//! `exp` claim alone, with no store lookup. That trades server-side
//! revocation for low per-request latency; invalidation is implicit expiry
//! only.

use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::storage::UserRecord;

/// Default token lifetime: 7 days, matching the web session length.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 7 * 24 * 3600;

/// Claims embedded in every issued token. Timestamps are unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: i64,
    pub email: String,
    /// Issued-at.
    pub iat: i64,
    /// Expiry.
    pub exp: i64,
}

impl Claims {
    /// Seconds until expiry measured from `now_secs`; negative when already
    /// expired.
    pub fn remaining_secs(&self, now_secs: i64) -> i64 {
        self.exp - now_secs
    }
}

/// Issues and verifies signed bearer tokens. Stateless; one instance is
/// shared by the whole server.
#[derive(Clone)]
pub struct TokenService {
    secret: Option<String>,
    ttl_secs: i64,
}

impl TokenService {
    pub fn new(secret: Option<String>, ttl_secs: i64) -> Self {
        let secret = secret.filter(|s| !s.is_empty());
        Self { secret, ttl_secs }
    }

    /// Read the signing secret and TTL from the environment. A missing
    /// secret is not fatal here; `issue` reports it per request so the
    /// server still starts and serves unauthenticated routes.
    pub fn from_env() -> Self {
        let secret = std::env::var("TECHMARKET_JWT_SECRET").ok();
        let ttl_secs = std::env::var("TECHMARKET_TOKEN_TTL_SECS")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        Self::new(secret, ttl_secs)
    }

    pub fn ttl_secs(&self) -> i64 { self.ttl_secs }

    pub fn secret_configured(&self) -> bool { self.secret.is_some() }

    /// Issue a token for the user with `iat = now` and `exp = now + TTL`.
    pub fn issue(&self, user: &UserRecord) -> AppResult<String> {
        let Some(secret) = self.secret.as_deref() else {
            return Err(AppError::config("JWT secret is not configured."));
        };
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user.id,
            email: user.email.clone(),
            iat: now,
            exp: now + self.ttl_secs,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
            .map_err(|e| AppError::internal(format!("token encoding failed: {e}")))
    }

    /// Verify signature and expiry, returning the claims. Any failure mode
    /// (malformed structure, bad signature, expired) collapses into one
    /// authentication error; callers never learn which check failed.
    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        let Some(secret) = self.secret.as_deref() else {
            // Without a secret nothing can validate; report as an auth
            // failure, not a config leak.
            return Err(AppError::auth("Invalid or expired token."));
        };
        let mut validation = Validation::default();
        validation.leeway = 0;
        decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
            .map(|data| data.claims)
            .map_err(|_| AppError::auth("Invalid or expired token."))
    }
}

/// Decode the payload segment of a JWT without verifying the signature.
///
/// Advisory only: the client uses this to read `exp` for warning/logout
/// timer math. Every authorization decision stays server-side.
pub fn decode_unverified(token: &str) -> Option<Claims> {
    let mut parts = token.split('.');
    let (_h, payload, _s) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}
