//! Maps engine errors onto JSON responses of the form
//! `{ "success": false, "error": ..., "reason"?: ... }`.

use axum::{
    extract::multipart::MultipartError,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domains::{AppError, Denial, MediaError};
use serde_json::json;

#[derive(Debug)]
pub enum ApiError {
    App(AppError),
    /// Malformed request that never reached the engine.
    BadRequest(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError::App(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::BadRequest(err.body_text())
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, String, Option<String>) {
        let err = match self {
            ApiError::BadRequest(message) => {
                return (StatusCode::BAD_REQUEST, message.clone(), None)
            }
            ApiError::App(err) => err,
        };

        match err {
            AppError::NotFound(entity, id) => {
                (StatusCode::NOT_FOUND, format!("{entity} {id} not found"), None)
            }
            AppError::ValidationError(message) => (StatusCode::BAD_REQUEST, message.clone(), None),
            AppError::ThreadLocked(number) => (
                StatusCode::FORBIDDEN,
                format!("thread {number} is locked"),
                None,
            ),
            AppError::Denied(Denial::Banned(ban)) => {
                let until = ban
                    .expires_at
                    .map(|at| format!(" until {}", at.to_rfc3339()))
                    .unwrap_or_default();
                (
                    StatusCode::FORBIDDEN,
                    format!("banned by {}{until}", ban.admin_name),
                    Some(ban.reason.clone()),
                )
            }
            AppError::Denied(Denial::CaptchaFailed {
                reason,
                auto_banned,
            }) => {
                let status = if *auto_banned {
                    StatusCode::FORBIDDEN
                } else {
                    StatusCode::BAD_REQUEST
                };
                (status, "captcha verification failed".into(), Some(reason.clone()))
            }
            AppError::Denied(Denial::Unauthorized) => (
                StatusCode::UNAUTHORIZED,
                "administrator session required".into(),
                None,
            ),
            AppError::Contention(message) | AppError::Conflict(message) => {
                (StatusCode::CONFLICT, message.clone(), None)
            }
            AppError::Media(media) => (media_status(media), media.to_string(), None),
            AppError::Internal(message) => {
                tracing::error!(error = %message, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".into(),
                    None,
                )
            }
        }
    }
}

fn media_status(err: &MediaError) -> StatusCode {
    match err {
        MediaError::Forbidden(_) => StatusCode::FORBIDDEN,
        err if err.is_client_error() => StatusCode::BAD_REQUEST,
        err => {
            tracing::error!(error = %err, "attachment storage failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, reason) = self.parts();
        let body = match reason {
            Some(reason) => json!({ "success": false, "error": error, "reason": reason }),
            None => json!({ "success": false, "error": error }),
        };
        (status, Json(body)).into_response()
    }
}
