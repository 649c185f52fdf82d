//! Error-kind to HTTP status mapping.
//!
//! Handlers never leak internal detail; the response carries the stable
//! error code and the error's display message only.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use microgig_types::{CoreError, ErrorKind};

/// Transport-level wrapper around a core error
#[derive(Debug)]
pub enum ApiError {
    /// A core operation failed
    Core(CoreError),
    /// Missing or malformed credentials (before any operation ran)
    Unauthenticated(&'static str),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self::Core(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Core(err) => match err.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::Expired => StatusCode::GONE,
                ErrorKind::InsufficientBalance => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "UNAUTHENTICATED",
            Self::Core(err) => err.error_code(),
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Unauthenticated(reason) => (*reason).to_string(),
            Self::Core(err) => err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(code = self.code(), message = %self.message(), "request failed");
        }
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microgig_types::JobId;

    #[test]
    fn test_status_mapping() {
        let not_found = ApiError::from(CoreError::JobNotFound { job_id: JobId::new() });
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let conflict = ApiError::from(CoreError::AlreadyReserved { job_id: JobId::new() });
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        assert_eq!(conflict.code(), "ALREADY_RESERVED");

        let validation = ApiError::from(CoreError::invalid_amount("no"));
        assert_eq!(validation.status(), StatusCode::BAD_REQUEST);

        let forbidden = ApiError::from(CoreError::unauthorized("not yours"));
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let unauthenticated = ApiError::Unauthenticated("missing token");
        assert_eq!(unauthenticated.status(), StatusCode::UNAUTHORIZED);
    }
}
