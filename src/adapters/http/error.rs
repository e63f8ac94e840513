//! Domain error to transport status mapping. Only this adapter converts
//! semantic codes into HTTP; messages are already sanitised upstream.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::LazyLock;

use crate::domain::errors::DomainError;
use crate::infrastructure::logging::SecretScrubber;

static SCRUBBER: LazyLock<SecretScrubber> = LazyLock::new(SecretScrubber::new);

pub type ApiResult<T> = Result<T, ApiError>;

/// Transport-level error.
#[derive(Debug)]
pub enum ApiError {
    /// A propagated domain error.
    Domain(DomainError),
    /// Missing or unknown bearer token.
    Unauthorized,
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self::Domain(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Domain(err) => match err {
                DomainError::Validation(_) => StatusCode::BAD_REQUEST,
                DomainError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                DomainError::PermissionDenied(_) => StatusCode::FORBIDDEN,
                DomainError::NotFound { .. } => StatusCode::NOT_FOUND,
                DomainError::Conflict(_) => StatusCode::CONFLICT,
                DomainError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
                DomainError::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                DomainError::Execution(_)
                | DomainError::Sandbox(_)
                | DomainError::Storage(_)
                | DomainError::AuditWrite(_)
                | DomainError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Domain(err) => err.code(),
        }
    }

    /// User-visible message: no stack traces, secrets scrubbed.
    fn message(&self) -> String {
        match self {
            Self::Unauthorized => "missing or invalid bearer token".to_string(),
            Self::Domain(err) => SCRUBBER.scrub(&err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        }));

        if let Self::Domain(DomainError::RateLimited {
            retry_after_secs, ..
        }) = &self
        {
            return (
                status,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                body,
            )
                .into_response();
        }

        (status, body).into_response()
    }
}
