//! API error surface.
//!
//! Every typed failure from the stores and the token service translates to
//! one of these stable kinds. Messages are short and never reveal
//! underlying detail.

use crate::auth::credential_store::CredentialError;
use crate::store::data_store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, PartialEq, Eq)]
pub enum ApiError {
    Invalid(String),
    Unauthorized,
    Forbidden,
    Conflict,
    NotFound,
    RateLimited,
    Timeout,
    Integrity,
    Internal,
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Invalid(_) => "invalid",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden => "forbidden",
            ApiError::Conflict => "conflict",
            ApiError::NotFound => "not-found",
            ApiError::RateLimited => "rate-limited",
            ApiError::Timeout => "timeout",
            ApiError::Integrity => "integrity",
            ApiError::Internal => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Invalid(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Timeout => StatusCode::REQUEST_TIMEOUT,
            ApiError::Integrity | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Invalid(reason) => reason.clone(),
            ApiError::Unauthorized => "Authentication required or credentials invalid".to_string(),
            ApiError::Forbidden => "Insufficient permissions".to_string(),
            ApiError::Conflict => "Resource already exists".to_string(),
            ApiError::NotFound => "Resource not found".to_string(),
            ApiError::RateLimited => "Too many attempts, try again later".to_string(),
            ApiError::Timeout => "Request deadline exceeded".to_string(),
            ApiError::Integrity => "Stored data failed verification, contact the operator".to_string(),
            ApiError::Internal => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.kind(),
            "message": self.message(),
        });
        (self.status(), Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::Integrity => ApiError::Integrity,
            StoreError::Io(_) | StoreError::Serialization(_) => ApiError::Internal,
        }
    }
}

impl From<CredentialError> for ApiError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::Conflict => ApiError::Conflict,
            CredentialError::Invalid(reason) => ApiError::Invalid(reason.to_string()),
            CredentialError::Unauthorized => ApiError::Unauthorized,
            CredentialError::Forbidden => ApiError::Forbidden,
            CredentialError::NotFound => ApiError::NotFound,
            CredentialError::Io(_) => ApiError::Internal,
        }
    }
}
