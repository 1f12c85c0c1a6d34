//! Unified application error model and mapping helpers.
//! This module provides a common error enum used across the HTTP surface,
//! the identity services and the storage layer, along with the HTTP status
//! mapping used when rendering responses.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    Validation { message: String },
    Auth { message: String },
    Forbidden { message: String },
    NotFound { message: String },
    Conflict { message: String },
    Config { message: String },
    Storage { message: String },
    Internal { message: String },
}

impl AppError {
    pub fn message(&self) -> &str {
        match self {
            AppError::Validation { message }
            | AppError::Auth { message }
            | AppError::Forbidden { message }
            | AppError::NotFound { message }
            | AppError::Conflict { message }
            | AppError::Config { message }
            | AppError::Storage { message }
            | AppError::Internal { message } => message.as_str(),
        }
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self { AppError::Validation { message: msg.into() } }
    pub fn auth<S: Into<String>>(msg: S) -> Self { AppError::Auth { message: msg.into() } }
    pub fn forbidden<S: Into<String>>(msg: S) -> Self { AppError::Forbidden { message: msg.into() } }
    pub fn not_found<S: Into<String>>(msg: S) -> Self { AppError::NotFound { message: msg.into() } }
    pub fn conflict<S: Into<String>>(msg: S) -> Self { AppError::Conflict { message: msg.into() } }
    pub fn config<S: Into<String>>(msg: S) -> Self { AppError::Config { message: msg.into() } }
    pub fn storage<S: Into<String>>(msg: S) -> Self { AppError::Storage { message: msg.into() } }
    pub fn internal<S: Into<String>>(msg: S) -> Self { AppError::Internal { message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::Validation { .. } => 400,
            AppError::Auth { .. } => 401,
            AppError::Forbidden { .. } => 403,
            AppError::NotFound { .. } => 404,
            AppError::Conflict { .. } => 409,
            AppError::Config { .. } => 500,
            AppError::Storage { .. } => 500,
            AppError::Internal { .. } => 500,
        }
    }

    /// True when the message is safe to show to a client verbatim.
    /// Config, storage and internal failures are reported as a generic 500;
    /// the specific message is only ever logged server-side.
    pub fn is_client_safe(&self) -> bool {
        !matches!(
            self,
            AppError::Storage { .. } | AppError::Internal { .. }
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Default mapping: treat as Storage unless downcasted elsewhere
        AppError::Storage { message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(AppError::validation("oops").http_status(), 400);
        assert_eq!(AppError::auth("no").http_status(), 401);
        assert_eq!(AppError::forbidden("blocked").http_status(), 403);
        assert_eq!(AppError::not_found("missing").http_status(), 404);
        assert_eq!(AppError::conflict("dup").http_status(), 409);
        assert_eq!(AppError::config("unset").http_status(), 500);
        assert_eq!(AppError::storage("io").http_status(), 500);
        assert_eq!(AppError::internal("panic").http_status(), 500);
    }

    #[test]
    fn server_side_errors_are_not_client_safe() {
        assert!(AppError::validation("x").is_client_safe());
        assert!(AppError::auth("x").is_client_safe());
        assert!(AppError::config("x").is_client_safe());
        assert!(!AppError::storage("x").is_client_safe());
        assert!(!AppError::internal("x").is_client_safe());
    }

    #[test]
    fn anyhow_maps_to_storage() {
        let e: AppError = anyhow::anyhow!("disk gone").into();
        assert_eq!(e.http_status(), 500);
        assert!(!e.is_client_safe());
    }
}
