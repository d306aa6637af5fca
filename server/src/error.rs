use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use derive_more::derive::Display;
use serde_json::json;

use crate::email::client::GmailApiErrorDetail;

pub type AppResult<T> = Result<T, AppError>;
pub type AppJsonResult<T> = AppResult<Json<T>>;

#[derive(Debug, Display)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
    RequestTimeout,
    TooManyRequests,
    Unauthorized(String),
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        if let Some(gmail_error) = error.downcast_ref::<GmailApiErrorDetail>() {
            let (code, message) = (gmail_error.code, gmail_error.message.clone());
            tracing::warn!("Gmail request failed: {:#}", error);
            return match code {
                400 => AppError::BadRequest(message),
                401 => AppError::Unauthorized(message),
                404 => AppError::NotFound(message),
                408 => AppError::RequestTimeout,
                429 => AppError::TooManyRequests,
                _ => AppError::Internal(error),
            };
        }

        if error
            .downcast_ref::<reqwest::Error>()
            .is_some_and(reqwest::Error::is_timeout)
        {
            return AppError::RequestTimeout;
        }

        AppError::Internal(error)
    }
}

fn error_body(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (
        status,
        Json(json!({"error": {
            "code": status.as_u16(),
            "message": message.into()
        }})),
    )
}

// This centralizes all different errors from our app in one place
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = match self {
            AppError::BadRequest(msg) => error_body(StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => error_body(StatusCode::NOT_FOUND, msg),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AppError::RequestTimeout => {
                error_body(StatusCode::REQUEST_TIMEOUT, "Request took too long")
            }
            AppError::TooManyRequests => {
                error_body(StatusCode::TOO_MANY_REQUESTS, "Too many requests")
            }
            AppError::Unauthorized(msg) => error_body(StatusCode::UNAUTHORIZED, msg),
        };
        tracing::debug!("Error response: {:?}", err.1);

        err.into_response()
    }
}
