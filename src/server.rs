//!
//! techmarket HTTP server
//! -----------------------
//! This module defines the Axum-based HTTP API for techmarket.
//!
//! Responsibilities:
//! - Registration/login/identity endpoints backed by the `identity` module.
//! - Bearer-token authentication for protected routes (`bearer_user`).
//! - Ownership authorization for listing mutations (`require_owner`), backed
//!   by owner-conditional store writes so the guard's read and the handler's
//!   write cannot disagree about ownership.
//! - Minimal listing browse/create/update/delete delegating to the store.
//!
//! Server-side verification is the sole trust boundary: nothing a client
//! decoded locally from its token influences any decision here.

use std::net::SocketAddr;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::error::{AppError, AppResult};
use crate::identity::{CredentialStore, TokenService};
use crate::storage::{ListingUpdate, NewListing, OwnedMutation, SharedStore};

/// Shared server state injected into all handlers.
///
/// Holds the global `SharedStore` handle, the credential service and the
/// token service. There is no per-session server state: identity travels in
/// the bearer token and ownership is re-read from the store on every check.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub credentials: CredentialStore,
    pub tokens: TokenService,
}

impl AppState {
    pub fn new(db_root: &str, tokens: TokenService) -> anyhow::Result<Self> {
        let store = SharedStore::new(db_root)?;
        let credentials = CredentialStore::new(store.clone(), tokens.clone());
        Ok(Self { store, credentials, tokens })
    }
}

/// The authenticated identity attached to a request after bearer
/// verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: i64,
    pub email: String,
}

/// Authentication guard: extract and verify the bearer token from the
/// Authorization header. Any failure is terminal for the request; there are
/// no retries and no fallback identity.
pub fn bearer_user(state: &AppState, headers: &HeaderMap) -> AppResult<AuthUser> {
    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let mut parts = header.splitn(2, ' ');
    let scheme = parts.next().unwrap_or("");
    let token = parts.next().unwrap_or("");
    if scheme != "Bearer" || token.is_empty() {
        return Err(AppError::auth("Missing or invalid Authorization header."));
    }
    let claims = state.tokens.verify(token)?;
    Ok(AuthUser { id: claims.sub, email: claims.email })
}

/// Parse a listing id path parameter. Anything that is not a positive
/// integer is a validation failure, not a lookup miss.
pub fn parse_listing_id(raw: &str) -> AppResult<i64> {
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(AppError::validation("Invalid listing id.")),
    }
}

/// Ownership guard for mutation endpoints, run after `bearer_user`.
///
/// Reads the listing's current owner fresh from the store and authorizes
/// only the owner. The subsequent mutation still re-checks ownership inside
/// the store write, so a delete or re-own racing this check cannot slip an
/// unauthorized write through; this guard exists to give early, specific
/// 404/403 responses.
pub fn require_owner(state: &AppState, user: &AuthUser, listing_id: i64) -> AppResult<()> {
    let owner = {
        let guard = state.store.0.lock();
        guard.listing_owner(listing_id)?
    };
    match owner {
        None => Err(AppError::not_found("Listing not found.")),
        Some(owner_id) if owner_id != user.id => Err(AppError::forbidden("Forbidden.")),
        Some(_) => Ok(()),
    }
}

/// Render an AppError as an HTTP response. Server-side failures are logged
/// with their specifics and reported to the client as the generic message
/// only; everything else passes its message through.
fn reply_err(err: AppError, generic: &str) -> (StatusCode, Json<serde_json::Value>) {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let message = if err.is_client_safe() {
        err.message().to_string()
    } else {
        error!("{}: {}", generic, err.message());
        generic.to_string()
    };
    (status, Json(json!({ "message": message })))
}

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    category: Option<String>,
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> impl IntoResponse {
    match state
        .credentials
        .register(payload.name.as_deref(), &payload.email, &payload.password)
    {
        Ok(ok) => (
            StatusCode::CREATED,
            Json(json!({ "user": ok.user, "token": ok.token })),
        ),
        Err(e) => reply_err(e, "Server error during registration."),
    }
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> impl IntoResponse {
    match state.credentials.login(&payload.email, &payload.password) {
        Ok(ok) => (
            StatusCode::OK,
            Json(json!({ "user": ok.user, "token": ok.token })),
        ),
        Err(e) => reply_err(e, "Server error during login."),
    }
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let out = bearer_user(&state, &headers).and_then(|u| state.credentials.lookup(u.id));
    match out {
        Ok(user) => (StatusCode::OK, Json(json!({ "user": user }))),
        Err(e) => reply_err(e, "Server error loading profile."),
    }
}

async fn list_listings(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> impl IntoResponse {
    let out = {
        let guard = state.store.0.lock();
        guard.list_listings(q.category.as_deref())
    };
    match out {
        Ok(listings) => (StatusCode::OK, Json(json!({ "listings": listings }))),
        Err(e) => reply_err(e.into(), "Error fetching listings."),
    }
}

async fn get_listing(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let out = parse_listing_id(&id).and_then(|id| {
        let guard = state.store.0.lock();
        guard
            .get_listing(id)
            .map_err(AppError::from)?
            .ok_or_else(|| AppError::not_found("Listing not found."))
    });
    match out {
        Ok(listing) => (StatusCode::OK, Json(json!({ "listing": listing }))),
        Err(e) => reply_err(e, "Error fetching listing."),
    }
}

async fn create_listing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewListing>,
) -> impl IntoResponse {
    let out = bearer_user(&state, &headers).and_then(|user| {
        if payload.title.trim().is_empty() || payload.price_cents <= 0 || payload.category.is_none()
        {
            return Err(AppError::validation("Missing required fields."));
        }
        let guard = state.store.0.lock();
        let listing = guard.insert_listing(user.id, payload)?;
        info!(target: "techmarket::listings", listing_id = listing.id, seller_id = user.id, "create");
        Ok(listing)
    });
    match out {
        Ok(listing) => (StatusCode::CREATED, Json(json!({ "listing": listing }))),
        Err(e) => reply_err(e, "Server error creating listing."),
    }
}

async fn update_listing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(changes): Json<ListingUpdate>,
) -> impl IntoResponse {
    let out = bearer_user(&state, &headers).and_then(|user| {
        let id = parse_listing_id(&id)?;
        require_owner(&state, &user, id)?;
        let guard = state.store.0.lock();
        match guard.update_listing_owned(id, user.id, changes)? {
            OwnedMutation::Applied(listing) => Ok(listing),
            // The guard passed but the conditional write did not: the row
            // changed between the two store operations.
            OwnedMutation::Missing => Err(AppError::not_found("Listing not found.")),
            OwnedMutation::NotOwner => Err(AppError::forbidden("Forbidden.")),
        }
    });
    match out {
        Ok(listing) => (StatusCode::OK, Json(json!({ "listing": listing }))),
        Err(e) => reply_err(e, "Server error updating listing."),
    }
}

async fn delete_listing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let out = bearer_user(&state, &headers).and_then(|user| {
        let id = parse_listing_id(&id)?;
        require_owner(&state, &user, id)?;
        let guard = state.store.0.lock();
        match guard.delete_listing_owned(id, user.id)? {
            OwnedMutation::Applied(()) => Ok(id),
            OwnedMutation::Missing => Err(AppError::not_found("Listing not found.")),
            OwnedMutation::NotOwner => Err(AppError::forbidden("Forbidden.")),
        }
    });
    match out {
        Ok(id) => {
            info!(target: "techmarket::listings", listing_id = id, "delete");
            (StatusCode::OK, Json(json!({ "message": "Listing deleted." })))
        }
        Err(e) => reply_err(e, "Server error deleting listing."),
    }
}

/// Mount all HTTP routes over the given state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "TechMarket API. Try /health" }))
        .route("/health", get(health))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
        .route("/listings", get(list_listings))
        .route("/listings", post(create_listing))
        .route("/listings/{id}", get(get_listing))
        .route("/listings/{id}", put(update_listing))
        .route("/listings/{id}", delete(delete_listing))
        .with_state(state)
}

/// Start the techmarket HTTP server bound to the given port.
pub async fn run_with_port(http_port: u16, db_root: &str, tokens: TokenService) -> anyhow::Result<()> {
    if !tokens.secret_configured() {
        tracing::warn!(
            "TECHMARKET_JWT_SECRET is not set; registration and login will fail until it is configured"
        );
    }
    let state = AppState::new(db_root, tokens)?;
    let app = build_router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
