//! Client-side pieces: the HTTP API client, the persisted token slot and
//! the session lifecycle manager used by the CLI.

pub mod api;
pub mod session;

pub use api::{ApiClient, ApiError, AuthApi, AuthPayload, TokenSlot};
pub use session::{ClientSession, SessionSnapshot, DEFAULT_WARNING_SECS};
