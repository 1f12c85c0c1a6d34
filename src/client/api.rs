//! HTTP API client for a remote techmarket server, plus the persisted token
//! slot. The session manager talks to the server only through the `AuthApi`
//! trait so tests can substitute a stub.

use std::path::{Path, PathBuf};

use anyhow::Context;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::identity::PublicUser;
use crate::storage::{Listing, ListingUpdate, NewListing};

/// A failed client call. `Status` carries the server's message and HTTP
/// status; everything else (connect failures, bad JSON) is `Network` and is
/// treated by the session manager as retryable without touching state.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Network(_) => None,
        }
    }
}

/// Response shape of register/login: the public user plus the bearer token.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AuthPayload {
    pub user: PublicUser,
    pub token: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct UserEnvelope {
    user: PublicUser,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct ListingEnvelope {
    listing: Listing,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct ListingsEnvelope {
    listings: Vec<Listing>,
}

/// Server operations the session manager depends on.
pub trait AuthApi {
    fn register(
        &self,
        name: Option<&str>,
        email: &str,
        password: &str,
    ) -> impl std::future::Future<Output = Result<AuthPayload, ApiError>> + Send;
    fn login(
        &self,
        email: &str,
        password: &str,
    ) -> impl std::future::Future<Output = Result<AuthPayload, ApiError>> + Send;
    fn me(&self, token: &str) -> impl std::future::Future<Output = Result<PublicUser, ApiError>> + Send;
}

/// Thin reqwest wrapper over the techmarket HTTP API.
#[derive(Clone)]
pub struct ApiClient {
    base: Url,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base: &str) -> anyhow::Result<Self> {
        let base = Url::parse(base).context("invalid base URL")?;
        let client = reqwest::Client::new();
        Ok(Self { base, client })
    }

    pub fn base(&self) -> &Url { &self.base }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> Result<T, ApiError> {
        let url = self
            .base
            .join(path)
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let mut req = self.client.request(method, url);
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }
        if let Some(b) = body {
            req = req.json(&b);
        }
        let resp = req.send().await.map_err(|e| ApiError::Network(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| ApiError::Network(e.to_string()))?;

        if !status.is_success() {
            // Prefer the server's message body; fall back to a generic line.
            let message = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
                .unwrap_or_else(|| format!("Request failed ({})", status.as_u16()));
            return Err(ApiError::Status { status: status.as_u16(), message });
        }
        serde_json::from_str(&text).map_err(|e| ApiError::Network(e.to_string()))
    }

    // --- listings (used by the CLI, all past the same bearer guard) ---

    pub async fn list_listings(&self, category: Option<&str>) -> Result<Vec<Listing>, ApiError> {
        let path = match category {
            Some(c) => format!("/listings?category={}", c),
            None => "/listings".to_string(),
        };
        let env: ListingsEnvelope = self.request(Method::GET, &path, None, None).await?;
        Ok(env.listings)
    }

    pub async fn get_listing(&self, id: i64) -> Result<Listing, ApiError> {
        let env: ListingEnvelope = self
            .request(Method::GET, &format!("/listings/{}", id), None, None)
            .await?;
        Ok(env.listing)
    }

    pub async fn create_listing(&self, token: &str, new: &NewListing) -> Result<Listing, ApiError> {
        let body = serde_json::to_value(new).map_err(|e| ApiError::Network(e.to_string()))?;
        let env: ListingEnvelope = self
            .request(Method::POST, "/listings", Some(token), Some(body))
            .await?;
        Ok(env.listing)
    }

    pub async fn update_listing(
        &self,
        token: &str,
        id: i64,
        changes: &ListingUpdate,
    ) -> Result<Listing, ApiError> {
        let body = serde_json::to_value(changes).map_err(|e| ApiError::Network(e.to_string()))?;
        let env: ListingEnvelope = self
            .request(Method::PUT, &format!("/listings/{}", id), Some(token), Some(body))
            .await?;
        Ok(env.listing)
    }

    pub async fn delete_listing(&self, token: &str, id: i64) -> Result<(), ApiError> {
        let _: serde_json::Value = self
            .request(Method::DELETE, &format!("/listings/{}", id), Some(token), None)
            .await?;
        Ok(())
    }
}

impl AuthApi for ApiClient {
    async fn register(
        &self,
        name: Option<&str>,
        email: &str,
        password: &str,
    ) -> Result<AuthPayload, ApiError> {
        self.request(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({ "name": name, "email": email, "password": password })),
        )
        .await
    }

    async fn login(&self, email: &str, password: &str) -> Result<AuthPayload, ApiError> {
        self.request(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": email, "password": password })),
        )
        .await
    }

    async fn me(&self, token: &str) -> Result<PublicUser, ApiError> {
        let env: UserEnvelope = self.request(Method::GET, "/auth/me", Some(token), None).await?;
        Ok(env.user)
    }
}

/// One named slot holding the current token string. Its absence is the
/// signed-out state; there is no other client-side credential storage.
#[derive(Debug, Clone)]
pub struct TokenSlot {
    path: PathBuf,
}

impl TokenSlot {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    /// Default slot location: `$TECHMARKET_STATE_DIR/token`, falling back to
    /// `~/.techmarket/token`.
    pub fn default_path() -> PathBuf {
        if let Ok(dir) = std::env::var("TECHMARKET_STATE_DIR") {
            return PathBuf::from(dir).join("token");
        }
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".techmarket").join("token")
    }

    pub fn load(&self) -> Option<String> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        let token = text.trim().to_string();
        if token.is_empty() { None } else { Some(token) }
    }

    pub fn store(&self, token: &str) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).ok();
        }
        std::fs::write(&self.path, token)
            .with_context(|| format!("writing token slot {}", self.path.display()))?;
        Ok(())
    }

    pub fn clear(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
