//!
//! Client session lifecycle manager
//! ---------------------------------
//! One explicit session object per client process: hydrates from the
//! persisted token slot at startup, performs login/register/logout against
//! the server, and schedules the expiry-warning / forced-logout timer pair
//! from locally-decoded claims.
//!
//! The local claim decode is advisory only; it drives UX timing and nothing
//! else. The server re-verifies the token on every request, so client-side
//! expiry handling is never a security boundary.
//!
//! Invariant: at most one pending warning timer and one pending logout timer
//! exist at any time. Every transition cancels the current pair before
//! optionally scheduling a new one, and a fired callback re-checks that its
//! pair is still the live one before touching state.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{Local, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::client::api::{ApiError, AuthApi, TokenSlot};
use crate::identity::{decode_unverified, PublicUser};

/// How long before expiry the warning notice fires, in seconds.
pub const DEFAULT_WARNING_SECS: u64 = 10;

const EXPIRED_MESSAGE: &str = "Session expired. Please log in again.";

/// Read-only copy of the session state for rendering.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub user: Option<PublicUser>,
    pub token: Option<String>,
    pub hydrating: bool,
    pub notice: Option<String>,
    pub error: Option<String>,
}

struct SessionCore {
    user: Option<PublicUser>,
    token: Option<String>,
    hydrating: bool,
    notice: Option<String>,
    error: Option<String>,
    slot: TokenSlot,
    /// Bumped on every cancel; callbacks from an older pair see a mismatch
    /// and become no-ops.
    generation: u64,
    warning_timer: Option<JoinHandle<()>>,
    logout_timer: Option<JoinHandle<()>>,
}

impl SessionCore {
    fn cancel_timers(&mut self) {
        self.generation += 1;
        if let Some(h) = self.warning_timer.take() {
            h.abort();
        }
        if let Some(h) = self.logout_timer.take() {
            h.abort();
        }
    }

    fn force_logout(&mut self, reason: Option<String>) {
        self.cancel_timers();
        self.slot.clear();
        self.user = None;
        self.token = None;
        self.notice = None;
        self.error = reason;
    }
}

/// The client-resident session state machine. Exactly one instance exists
/// per client process; consumers receive it by reference from the root
/// scope rather than through any global.
pub struct ClientSession<A: AuthApi> {
    api: A,
    warning_window: Duration,
    core: Arc<Mutex<SessionCore>>,
}

impl<A: AuthApi> ClientSession<A> {
    pub fn new(api: A, slot: TokenSlot) -> Self {
        Self::with_warning_window(api, slot, Duration::from_secs(DEFAULT_WARNING_SECS))
    }

    pub fn with_warning_window(api: A, slot: TokenSlot, warning_window: Duration) -> Self {
        let core = SessionCore {
            user: None,
            token: None,
            hydrating: true,
            notice: None,
            error: None,
            slot,
            generation: 0,
            warning_timer: None,
            logout_timer: None,
        };
        Self { api, warning_window, core: Arc::new(Mutex::new(core)) }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let c = self.core.lock();
        SessionSnapshot {
            user: c.user.clone(),
            token: c.token.clone(),
            hydrating: c.hydrating,
            notice: c.notice.clone(),
            error: c.error.clone(),
        }
    }

    pub fn user(&self) -> Option<PublicUser> { self.core.lock().user.clone() }
    pub fn token(&self) -> Option<String> { self.core.lock().token.clone() }
    pub fn notice(&self) -> Option<String> { self.core.lock().notice.clone() }
    pub fn error(&self) -> Option<String> { self.core.lock().error.clone() }
    pub fn is_hydrating(&self) -> bool { self.core.lock().hydrating }

    pub fn is_authenticated(&self) -> bool {
        let c = self.core.lock();
        c.user.is_some() && c.token.is_some()
    }

    /// Live (not yet fired or cancelled) warning/logout timers.
    pub fn pending_timers(&self) -> (bool, bool) {
        let c = self.core.lock();
        let live = |h: &Option<JoinHandle<()>>| h.as_ref().map(|h| !h.is_finished()).unwrap_or(false);
        (live(&c.warning_timer), live(&c.logout_timer))
    }

    /// Reconstruct session state from the persisted token slot. Called once
    /// per process start.
    ///
    /// No persisted token settles signed-out without any network call. A
    /// present token is confirmed against `/auth/me`; rejection clears the
    /// slot and settles signed-out with a session-expired error, while an
    /// unreachable server settles signed-out but keeps the slot for the next
    /// start.
    pub async fn hydrate(&self) {
        let token = {
            let mut c = self.core.lock();
            c.hydrating = true;
            c.slot.load()
        };

        let Some(token) = token else {
            let mut c = self.core.lock();
            c.user = None;
            c.token = None;
            c.hydrating = false;
            return;
        };

        match self.api.me(&token).await {
            Ok(user) => {
                {
                    let mut c = self.core.lock();
                    c.user = Some(user);
                    c.token = Some(token.clone());
                    c.notice = None;
                    c.error = None;
                    c.hydrating = false;
                }
                self.schedule_session_timers(&token);
            }
            Err(ApiError::Network(e)) => {
                // The server was unreachable, which says nothing about the
                // token. Keep the slot so the next start can try again.
                debug!(target: "techmarket::client", "hydrate unreachable: {}", e);
                let mut c = self.core.lock();
                c.user = None;
                c.token = None;
                c.notice = Some("Could not reach the server. Please try again.".to_string());
                c.hydrating = false;
            }
            Err(e) => {
                debug!(target: "techmarket::client", "hydrate failed: {}", e);
                // Decode before clearing so the message can carry the expiry
                // time when the payload is readable.
                let message = decode_unverified(&token)
                    .and_then(|cl| Local.timestamp_opt(cl.exp, 0).single())
                    .map(|t| format!("Session expired at {}. Please log in again.", t.format("%H:%M:%S")))
                    .unwrap_or_else(|| EXPIRED_MESSAGE.to_string());
                let mut c = self.core.lock();
                c.cancel_timers();
                c.slot.clear();
                c.user = None;
                c.token = None;
                if c.error.is_none() {
                    c.error = Some(message);
                }
                c.hydrating = false;
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<PublicUser, ApiError> {
        let payload = self.api.login(email, password).await?;
        self.adopt(payload.user, payload.token)
    }

    pub async fn register(
        &self,
        name: Option<&str>,
        email: &str,
        password: &str,
    ) -> Result<PublicUser, ApiError> {
        let payload = self.api.register(name, email, password).await?;
        self.adopt(payload.user, payload.token)
    }

    /// Tear the session down: cancel timers, clear the slot, identity and
    /// notice. The error becomes `reason` when given, otherwise clears too.
    pub fn logout(&self, reason: Option<&str>) {
        let mut c = self.core.lock();
        c.force_logout(reason.map(str::to_string));
    }

    fn adopt(&self, user: PublicUser, token: String) -> Result<PublicUser, ApiError> {
        {
            let mut c = self.core.lock();
            c.slot
                .store(&token)
                .map_err(|e| ApiError::Network(e.to_string()))?;
            c.user = Some(user.clone());
            c.token = Some(token.clone());
            c.notice = None;
            c.error = None;
            c.hydrating = false;
        }
        self.schedule_session_timers(&token);
        Ok(user)
    }

    /// (Re)arm the warning/logout timer pair from the token's locally
    /// decoded expiry. Idempotent: any existing pair is cancelled first.
    ///
    /// An already-expired token forces logout immediately. A token expiring
    /// inside the warning window fires the warning now with the true
    /// remaining seconds; otherwise the warning is scheduled to fire
    /// `warning_window` before expiry. The forced logout always fires at
    /// expiry.
    pub fn schedule_session_timers(&self, token: &str) {
        let mut core = self.core.lock();
        core.cancel_timers();
        core.notice = None;

        // Without a readable exp there is nothing to schedule against.
        let Some(claims) = decode_unverified(token) else { return };

        let now_ms = Utc::now().timestamp_millis();
        let remaining_ms = claims.exp * 1000 - now_ms;
        if remaining_ms <= 0 {
            core.force_logout(Some(EXPIRED_MESSAGE.to_string()));
            return;
        }

        let generation = core.generation;
        let warning_ms = self.warning_window.as_millis() as i64;

        if remaining_ms > warning_ms {
            let delay = Duration::from_millis((remaining_ms - warning_ms) as u64);
            let weak = Arc::downgrade(&self.core);
            let message = format!("Session expires in {} seconds.", self.warning_window.as_secs());
            core.warning_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                fire_warning(&weak, generation, message);
            }));
        } else {
            // Token lifetime is already inside the window: warn now with the
            // real remaining seconds.
            let secs = ((remaining_ms + 999) / 1000).max(1);
            core.notice = Some(format!("Session expires in {} seconds.", secs));
        }

        let delay = Duration::from_millis(remaining_ms as u64);
        let weak = Arc::downgrade(&self.core);
        core.logout_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire_logout(&weak, generation);
        }));
    }
}

fn fire_warning(weak: &Weak<Mutex<SessionCore>>, generation: u64, message: String) {
    // The owning session may be gone, or this pair may have been replaced;
    // either way a stale callback must not touch state.
    let Some(core) = weak.upgrade() else { return };
    let mut c = core.lock();
    if c.generation != generation {
        return;
    }
    c.notice = Some(message);
}

fn fire_logout(weak: &Weak<Mutex<SessionCore>>, generation: u64) {
    let Some(core) = weak.upgrade() else { return };
    let mut c = core.lock();
    if c.generation != generation {
        return;
    }
    c.force_logout(Some(EXPIRED_MESSAGE.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Build a structurally-valid JWT with a chosen expiry. The signature is
    /// garbage; only the locally-decoded payload matters here.
    fn token_expiring_in(secs: i64) -> String {
        let b64 = |v: &serde_json::Value| {
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(v.to_string())
        };
        let now = Utc::now().timestamp();
        let header = b64(&json!({"alg": "HS256", "typ": "JWT"}));
        let payload = b64(&json!({
            "sub": 1, "email": "a@b.co", "iat": now, "exp": now + secs
        }));
        format!("{}.{}.c2ln", header, payload)
    }

    fn test_user() -> PublicUser {
        PublicUser { id: 1, name: None, email: "a@b.co".into(), created_at: Utc::now() }
    }

    /// Stub server: counts `/auth/me` calls and returns what it is told to.
    struct StubApi {
        me_calls: AtomicUsize,
        me_ok: bool,
        me_network_down: bool,
    }

    impl StubApi {
        fn new(me_ok: bool) -> Self {
            Self { me_calls: AtomicUsize::new(0), me_ok, me_network_down: false }
        }

        fn network_down() -> Self {
            Self { me_calls: AtomicUsize::new(0), me_ok: false, me_network_down: true }
        }
    }

    impl AuthApi for StubApi {
        async fn register(
            &self,
            _name: Option<&str>,
            _email: &str,
            _password: &str,
        ) -> Result<crate::client::api::AuthPayload, ApiError> {
            Ok(crate::client::api::AuthPayload { user: test_user(), token: token_expiring_in(3600) })
        }

        async fn login(&self, _email: &str, password: &str) -> Result<crate::client::api::AuthPayload, ApiError> {
            if password == "wrong" {
                return Err(ApiError::Status { status: 401, message: "Invalid credentials.".into() });
            }
            Ok(crate::client::api::AuthPayload { user: test_user(), token: token_expiring_in(3600) })
        }

        async fn me(&self, _token: &str) -> Result<PublicUser, ApiError> {
            self.me_calls.fetch_add(1, Ordering::SeqCst);
            if self.me_network_down {
                return Err(ApiError::Network("connection refused".into()));
            }
            if self.me_ok {
                Ok(test_user())
            } else {
                Err(ApiError::Status { status: 401, message: "Invalid or expired token.".into() })
            }
        }
    }

    fn session(dir: &TempDir, me_ok: bool) -> ClientSession<StubApi> {
        ClientSession::new(StubApi::new(me_ok), TokenSlot::new(dir.path().join("token")))
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn short_lived_token_warns_immediately_and_logs_out_at_expiry() {
        let tmp = TempDir::new().unwrap();
        let s = session(&tmp, true);
        {
            let mut c = s.core.lock();
            c.user = Some(test_user());
            c.token = Some(token_expiring_in(3));
            c.slot.store("x").unwrap();
        }

        s.schedule_session_timers(&token_expiring_in(3));

        // Inside the 10s window: warning fires now with the true remaining
        // seconds, not after a 10s delay.
        assert_eq!(s.notice().as_deref(), Some("Session expires in 3 seconds."));
        let (warning, logout) = s.pending_timers();
        assert!(!warning, "no deferred warning timer expected");
        assert!(logout, "logout timer must be armed");

        settle().await;
        tokio::time::advance(Duration::from_millis(3100)).await;
        settle().await;

        assert!(!s.is_authenticated());
        assert!(s.token().is_none());
        assert_eq!(s.error().as_deref(), Some("Session expired. Please log in again."));
        assert!(s.notice().is_none());
        // slot cleared by the forced logout
        assert!(TokenSlot::new(tmp.path().join("token")).load().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn long_lived_token_defers_warning_until_window() {
        let tmp = TempDir::new().unwrap();
        let s = session(&tmp, true);
        s.schedule_session_timers(&token_expiring_in(3600));

        assert!(s.notice().is_none());
        let (warning, logout) = s.pending_timers();
        assert!(warning && logout);

        // just before the warning point: still silent
        settle().await;
        tokio::time::advance(Duration::from_secs(3585)).await;
        settle().await;
        assert!(s.notice().is_none());

        tokio::time::advance(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(s.notice().as_deref(), Some("Session expires in 10 seconds."));

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(s.error().as_deref(), Some("Session expired. Please log in again."));
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_leaves_exactly_one_timer_pair() {
        let tmp = TempDir::new().unwrap();
        let s = session(&tmp, true);

        s.schedule_session_timers(&token_expiring_in(3600));
        s.schedule_session_timers(&token_expiring_in(3600));
        settle().await;

        let (warning, logout) = s.pending_timers();
        assert!(warning && logout);

        // Run past expiry: the superseded pair must not produce a second
        // logout or a stray notice.
        tokio::time::advance(Duration::from_secs(3601)).await;
        settle().await;
        assert_eq!(s.error().as_deref(), Some("Session expired. Please log in again."));
        let (warning, logout) = s.pending_timers();
        assert!(!warning && !logout);
    }

    #[tokio::test(start_paused = true)]
    async fn already_expired_token_forces_logout_without_timers() {
        let tmp = TempDir::new().unwrap();
        let s = session(&tmp, true);
        {
            let c = s.core.lock();
            c.slot.store("stale").unwrap();
        }

        s.schedule_session_timers(&token_expiring_in(-5));

        assert!(!s.is_authenticated());
        assert_eq!(s.error().as_deref(), Some("Session expired. Please log in again."));
        let (warning, logout) = s.pending_timers();
        assert!(!warning && !logout);
        assert!(TokenSlot::new(tmp.path().join("token")).load().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn hydrate_without_token_is_signed_out_and_offline() {
        let tmp = TempDir::new().unwrap();
        let s = session(&tmp, true);

        s.hydrate().await;

        assert!(!s.is_hydrating());
        assert!(!s.is_authenticated());
        assert!(s.error().is_none());
        assert_eq!(s.api.me_calls.load(Ordering::SeqCst), 0, "no network call expected");
    }

    #[tokio::test(start_paused = true)]
    async fn hydrate_with_rejected_token_clears_slot_and_reports_expiry() {
        let tmp = TempDir::new().unwrap();
        let s = session(&tmp, false);
        {
            let c = s.core.lock();
            c.slot.store(&token_expiring_in(-60)).unwrap();
        }

        s.hydrate().await;

        assert!(!s.is_hydrating());
        assert!(!s.is_authenticated());
        assert_eq!(s.api.me_calls.load(Ordering::SeqCst), 1);
        let err = s.error().expect("expiry error expected");
        assert!(err.starts_with("Session expired at "), "got: {err}");
        assert!(TokenSlot::new(tmp.path().join("token")).load().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn hydrate_with_unreachable_server_keeps_the_slot() {
        let tmp = TempDir::new().unwrap();
        let s = ClientSession::new(StubApi::network_down(), TokenSlot::new(tmp.path().join("token")));
        {
            let c = s.core.lock();
            c.slot.store(&token_expiring_in(3600)).unwrap();
        }

        s.hydrate().await;

        assert!(!s.is_hydrating());
        assert!(!s.is_authenticated());
        assert!(s.error().is_none());
        assert_eq!(
            s.notice().as_deref(),
            Some("Could not reach the server. Please try again.")
        );
        // the token is still there for the next start
        assert!(TokenSlot::new(tmp.path().join("token")).load().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn hydrate_with_accepted_token_adopts_identity_and_schedules() {
        let tmp = TempDir::new().unwrap();
        let s = session(&tmp, true);
        {
            let c = s.core.lock();
            c.slot.store(&token_expiring_in(3600)).unwrap();
        }

        s.hydrate().await;

        assert!(s.is_authenticated());
        assert!(!s.is_hydrating());
        let (warning, logout) = s.pending_timers();
        assert!(warning && logout);
    }

    #[tokio::test(start_paused = true)]
    async fn login_failure_leaves_state_unchanged() {
        let tmp = TempDir::new().unwrap();
        let s = session(&tmp, true);

        let err = s.login("a@b.co", "wrong").await.unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert!(!s.is_authenticated());
        let (warning, logout) = s.pending_timers();
        assert!(!warning && !logout);

        let user = s.login("a@b.co", "correct-password").await.unwrap();
        assert_eq!(user.id, 1);
        assert!(s.is_authenticated());
        assert_eq!(s.token(), TokenSlot::new(tmp.path().join("token")).load());
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_mirrors_session_state_across_transitions() {
        let tmp = TempDir::new().unwrap();
        let s = session(&tmp, true);

        let snap = s.snapshot();
        assert!(snap.hydrating);
        assert!(snap.user.is_none() && snap.token.is_none());
        assert!(snap.notice.is_none() && snap.error.is_none());

        s.login("a@b.co", "pw").await.unwrap();
        let snap = s.snapshot();
        assert_eq!(snap.user.map(|u| u.id), Some(1));
        assert_eq!(snap.token, s.token());
        assert!(!snap.hydrating);

        s.logout(Some("bye"));
        let snap = s.snapshot();
        assert!(snap.user.is_none() && snap.token.is_none());
        assert_eq!(snap.error.as_deref(), Some("bye"));
    }

    #[tokio::test(start_paused = true)]
    async fn logout_with_reason_sets_error_and_cancels_pair() {
        let tmp = TempDir::new().unwrap();
        let s = session(&tmp, true);
        s.login("a@b.co", "pw").await.unwrap();
        let (warning, logout) = s.pending_timers();
        assert!(warning && logout);

        s.logout(Some("Signed out on another device."));

        assert!(!s.is_authenticated());
        assert_eq!(s.error().as_deref(), Some("Signed out on another device."));
        assert!(s.notice().is_none());
        settle().await;
        let (warning, logout) = s.pending_timers();
        assert!(!warning && !logout);

        // plain logout clears the error again
        s.logout(None);
        assert!(s.error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn callbacks_after_teardown_are_noops() {
        let tmp = TempDir::new().unwrap();
        let s = session(&tmp, true);
        s.schedule_session_timers(&token_expiring_in(2));
        let weak = Arc::downgrade(&s.core);
        drop(s);

        tokio::time::advance(Duration::from_secs(3)).await;
        settle().await;
        assert!(weak.upgrade().is_none());
    }
}
