use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::uploads::UploadError;

/// Failure taxonomy for the account service. Every handler returns
/// `Result<_, ApiError>`, and `into_response` is the single boundary that
/// turns a failure into the `{success, message, ...}` envelope.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed input; one message per failed rule.
    #[error("validation failed")]
    Validation(Vec<String>),
    /// A unique field is taken. Carries the field name shown to the client.
    #[error("{0} already in use")]
    Conflict(&'static str),
    /// Login failure. The message never reveals which credential was wrong.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<String>>,
}

impl ErrorBody {
    fn message(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: None,
            errors: None,
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Conflict(_) | ApiError::Upload(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Detail is only exposed outside production.
fn internal_message(err: &anyhow::Error, production: bool) -> String {
    if production {
        "Internal server error".to_string()
    } else {
        format!("Internal server error: {}", err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::Validation(errors) => ErrorBody {
                errors: Some(errors),
                ..ErrorBody::message("Validation failed")
            },
            ApiError::Conflict(field) => ErrorBody::message(format!("{} already in use", field)),
            ApiError::InvalidCredentials => ErrorBody::message("Invalid credentials"),
            ApiError::NotFound(what) => ErrorBody::message(format!("{} not found", what)),
            ApiError::Upload(err) => ErrorBody {
                error: Some(err.code()),
                ..ErrorBody::message(err.to_string())
            },
            ApiError::Internal(err) => {
                error!(error = %err, "unhandled internal error");
                let production = std::env::var("APP_ENV")
                    .map(|v| v == "production")
                    .unwrap_or(false);
                ErrorBody::message(internal_message(&err, production))
            }
        };
        (status, Json(body)).into_response()
    }
}
