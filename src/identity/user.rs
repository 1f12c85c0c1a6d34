use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::storage::UserRecord;

/// The client-visible user shape. Omits the password hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicUser {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl From<UserRecord> for PublicUser {
    fn from(rec: UserRecord) -> Self {
        Self { id: rec.id, name: rec.name, email: rec.email, created_at: rec.created_at }
    }
}

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    // no whitespace or '@' in local part and domain, at least one dot in the domain
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap()
});

/// Canonical email form: trimmed and lowercased. All storage and lookups use
/// this form so case variants of one address cannot register twice.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}
