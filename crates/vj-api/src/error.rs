//! API error handling

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use crate::auth::password::PasswordError;
use crate::auth::revocation::RevocationError;
use crate::auth::uid_pool::UidPoolError;

/// Message for every rejected bearer token; the reason stays server-side
pub const UNAUTHORIZED_MESSAGE: &str = "Could not validate credentials";

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new("NOT_FOUND", format!("{resource} not found"))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn unauthorized() -> Self {
        Self::new("UNAUTHORIZED", UNAUTHORIZED_MESSAGE)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn internal_error() -> Self {
        Self::new("INTERNAL_ERROR", "Internal server error")
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    /// Bearer token rejected
    Unauthorized,
    /// Login with an unknown email or a wrong password
    InvalidCredentials,
    Forbidden(String),
    Conflict(String),
    /// A dependency is down and the request could not take effect
    ServiceUnavailable(String),
    Internal(String),
    Database(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let challenge = matches!(self, AppError::Unauthorized | AppError::InvalidCredentials);

        let (status, error) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ApiError::not_found(&msg)),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ApiError::bad_request(msg)),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, ApiError::unauthorized()),
            AppError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                ApiError::new("UNAUTHORIZED", "Incorrect email or password"),
            ),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, ApiError::forbidden(msg)),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, ApiError::conflict(msg)),
            AppError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ApiError::new("SERVICE_UNAVAILABLE", msg),
            ),
            AppError::Internal(msg) => {
                error!(error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, ApiError::internal_error())
            }
            AppError::Database(msg) => {
                error!(error = %msg, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::new("DATABASE_ERROR", "Database operation failed"),
                )
            }
        };

        let mut response = (status, Json(error)).into_response();
        if challenge {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<vj_core::VjError> for AppError {
    fn from(err: vj_core::VjError) -> Self {
        use vj_core::VjError;

        match err {
            VjError::NotFound(msg) => AppError::NotFound(msg),
            VjError::UniqueViolation { field, .. } => {
                AppError::Conflict(format!("{field} is already in use"))
            }
            VjError::ValidationError(msg) => AppError::BadRequest(msg),
            VjError::DatabaseError(msg) => AppError::Database(msg),
            VjError::ConfigError(msg) => AppError::Internal(format!("Configuration error: {msg}")),
            VjError::Other(err) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<RevocationError> for AppError {
    fn from(err: RevocationError) -> Self {
        match err {
            RevocationError::ServiceUnavailable { .. } => AppError::ServiceUnavailable(
                "Temporarily unable to process logout, please retry".to_string(),
            ),
            RevocationError::Cache(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<UidPoolError> for AppError {
    fn from(err: UidPoolError) -> Self {
        match err {
            UidPoolError::Store(e) => e.into(),
            UidPoolError::Cache(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_carries_bearer_challenge() {
        let response = AppError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );

        let response = AppError::Forbidden("Admin only".into()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AppError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                AppError::ServiceUnavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (AppError::NotFound("User".into()), StatusCode::NOT_FOUND),
            (AppError::Database("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_from_core_errors() {
        let err: AppError = vj_core::VjError::UniqueViolation {
            field: "email".to_string(),
            constraint: None,
        }
        .into();
        assert!(matches!(err, AppError::Conflict(ref m) if m.contains("email")));

        let err: AppError = vj_core::VjError::DatabaseError("down".into()).into();
        assert!(matches!(err, AppError::Database(_)));
    }

    #[test]
    fn test_revocation_outage_maps_to_503() {
        let err: AppError = RevocationError::ServiceUnavailable {
            attempts: 3,
            source: crate::cache::CacheError::Timeout,
        }
        .into();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
    }
}
