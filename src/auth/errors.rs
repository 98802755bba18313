use axum::{
    extract::rejection::{FormRejection, JsonRejection},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use super::{password::PasswordError, repo::StoreError};

/// Why a bearer token was refused. Only ever logged; clients see `Unauthorized`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is malformed or its signature is invalid")]
    Malformed,
    #[error("token has expired")]
    Expired,
    #[error("failed to sign token: {0}")]
    Signing(String),
    #[error("token lifetime runs past the representable date range")]
    TtlOutOfRange,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Email already registered")]
    Conflict,
    #[error("Invalid credentials")]
    Unauthorized,
    #[error("Account not found")]
    NotFound,
    #[error("{0}")]
    BadRequest(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Conflict => StatusCode::CONFLICT,
            AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
            AuthError::NotFound => StatusCode::NOT_FOUND,
            AuthError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict => AuthError::Conflict,
            StoreError::Unavailable(msg) => AuthError::Unavailable(msg),
        }
    }
}

impl From<PasswordError> for AuthError {
    fn from(e: PasswordError) -> Self {
        AuthError::Internal(e.to_string())
    }
}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Signing(msg) => AuthError::Internal(msg),
            TokenError::TtlOutOfRange => {
                AuthError::Internal(TokenError::TtlOutOfRange.to_string())
            }
            TokenError::Malformed | TokenError::Expired => AuthError::Unauthorized,
        }
    }
}

impl From<JsonRejection> for AuthError {
    fn from(e: JsonRejection) -> Self {
        AuthError::BadRequest(format!("Invalid request: {}", e.body_text()))
    }
}

impl From<FormRejection> for AuthError {
    fn from(e: FormRejection) -> Self {
        AuthError::BadRequest(format!("Invalid request: {}", e.body_text()))
    }
}

impl From<tokio::task::JoinError> for AuthError {
    fn from(e: tokio::task::JoinError) -> Self {
        AuthError::Internal(format!("hashing task failed: {e}"))
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AuthError::Unavailable(_) | AuthError::Internal(_) => {
                error!(error = %self, %status, "request failed");
                status
                    .canonical_reason()
                    .unwrap_or("Internal Server Error")
                    .to_string()
            }
            other => other.to_string(),
        };

        let mut res = (status, Json(json!({ "error": message }))).into_response();
        if status == StatusCode::UNAUTHORIZED {
            res.headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        res
    }
}
