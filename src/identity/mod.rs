//! Central identity handling for techmarket: user shapes and validation,
//! signed bearer tokens, and credential registration/login.
//! Keep the public surface thin and split implementation across sub-modules.

mod credentials;
mod token;
mod user;

pub use credentials::{AuthSuccess, CredentialStore};
pub use token::{decode_unverified, Claims, TokenService, DEFAULT_TOKEN_TTL_SECS};
pub use user::{is_valid_email, normalize_email, PublicUser};
