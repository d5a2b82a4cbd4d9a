//! Error taxonomy shared by the registry service and its clients.
//!
//! `Error` crosses the wire as JSON (`{"kind": .., "detail": ..}`), so every
//! variant a client can observe is serde-serialisable. Store failures stay
//! service-side as `StoreError` and reach clients as `Error::Remote`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures reported by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum AuthError {
    #[error("the email address is badly formatted")]
    InvalidEmail,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("an account already exists for this email address")]
    DuplicateAccount,
    #[error("password should be at least {minimum} characters")]
    WeakPassword { minimum: usize },
    #[error("please login to continue")]
    NotAuthenticated,
    #[error("session token is invalid or expired")]
    InvalidToken,
}

/// Form problems caught before any remote call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("{field} is required")]
    MissingField { field: String },
    #[error("{field} must be a whole number, got {value:?}")]
    InvalidNumber { field: String, value: String },
    #[error("passwords do not match")]
    PasswordMismatch,
    #[error("query rejected: {reason}")]
    InvalidQuery { reason: String },
    #[error("document rejected: {reason}")]
    InvalidDocument { reason: String },
}

impl ValidationError {
    pub fn missing(field: &str) -> Self {
        Self::MissingField {
            field: field.to_owned(),
        }
    }
}

/// Rejections of a register/drop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum EnrollmentError {
    #[error("please login to register for courses")]
    NotAuthenticated,
    #[error("course not found")]
    CourseNotFound,
    #[error("already registered for this course")]
    AlreadyRegistered,
    #[error("course is full")]
    CourseFull,
    #[error("not registered for this course")]
    NotRegistered,
}

/// Everything a caller of the registry can see go wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),
    #[error("{collection}/{id} not found")]
    NotFound { collection: String, id: String },
    #[error("permission denied")]
    Forbidden,
    #[error("remote service failure: {0}")]
    Remote(String),
}

/// Failures inside the sled-backed document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{collection}/{id} not found")]
    NotFound { collection: String, id: String },
    #[error("{key} does not hold a JSON object")]
    Corrupt { key: String },
    #[error(transparent)]
    Sled(#[from] sled::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{key} already exists")]
    Exists { key: String },
    #[error("{key} rejected: {reason}")]
    Invalid { key: String, reason: String },
    #[error(transparent)]
    Rejected(#[from] EnrollmentError),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { collection, id } => Self::NotFound { collection, id },
            StoreError::Rejected(rule) => Self::Enrollment(rule),
            StoreError::Invalid { reason, .. } => ValidationError::InvalidDocument { reason }.into(),
            other => {
                tracing::error!(error = %other, "document store failure");
                Self::Remote(other.to_string())
            }
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Remote(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
