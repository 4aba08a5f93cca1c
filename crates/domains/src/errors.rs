//! # AppError
//!
//! Centralized error handling for the FireChan engine.
//! Maps domain-specific failures to actionable error types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::{Ban, PostNumber};

/// What the caller sees about the ban that stopped them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BanInfo {
    pub reason: String,
    pub admin_name: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&Ban> for BanInfo {
    fn from(ban: &Ban) -> Self {
        Self {
            reason: ban.reason.clone(),
            admin_name: ban.admin_name.clone(),
            issued_at: ban.issued_at,
            expires_at: ban.expires_at,
        }
    }
}

/// Why the anti-abuse gate refused a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Denial {
    Banned(BanInfo),
    CaptchaFailed {
        reason: String,
        /// Set when this failure tripped the automatic temporary ban.
        auto_banned: bool,
    },
    Unauthorized,
}

impl std::fmt::Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Denial::Banned(info) => write!(f, "banned: {}", info.reason),
            Denial::CaptchaFailed { reason, .. } => write!(f, "captcha failed: {reason}"),
            Denial::Unauthorized => f.write_str("administrator session required"),
        }
    }
}

/// The primary error type for all domain operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (e.g., Thread, Reply, Report)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Validation failure (e.g., missing comment, oversized attachment)
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Reply attempted on a locked thread by a non-administrator
    #[error("thread {0} is locked")]
    ThreadLocked(PostNumber),

    /// Anti-abuse gate refusal (ban, captcha, missing admin session)
    #[error("denied: {0}")]
    Denied(Denial),

    /// Compare-and-swap lost against a concurrent writer
    #[error("contention: {0}")]
    Contention(String),

    /// Resource already exists (e.g., duplicate post number)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Attachment storage refused or failed the operation
    #[error(transparent)]
    Media(#[from] MediaError),

    /// Infrastructure failure (e.g., store down, disk full)
    #[error("internal service error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        AppError::NotFound(entity.to_string(), id.to_string())
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        AppError::Internal(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(..))
    }
}

impl From<Denial> for AppError {
    fn from(denial: Denial) -> Self {
        AppError::Denied(denial)
    }
}

/// A specialized Result type for FireChan logic.
pub type Result<T> = std::result::Result<T, AppError>;

/// Failures of the attachment storage collaborator.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("file type not allowed: {0}")]
    DisallowedType(String),

    #[error("file exceeds the maximum size of {max} bytes ({actual} bytes)")]
    TooLarge { max: u64, actual: u64 },

    #[error("invalid board name")]
    InvalidBoard,

    /// Path resolves outside the managed attachment root.
    #[error("path not allowed: {0}")]
    Forbidden(String),

    #[error("storage failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage failure: {0}")]
    Other(String),
}

impl MediaError {
    /// True for failures caused by the submitted file rather than the store.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            MediaError::DisallowedType(_) | MediaError::TooLarge { .. } | MediaError::InvalidBoard
        )
    }
}
