//! API error responses.
//!
//! Every error body has the shape
//! `{"detail": {"code": "<MACHINE_READABLE>", "message": "<human>"}}`.

use crate::control::ControlError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn auth_required() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "AUTH_REQUIRED",
            "Missing or invalid bearer token.",
        )
    }

    pub fn forbidden() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "RBAC_FORBIDDEN",
            "Role does not allow this operation.",
        )
    }

    pub fn rate_limited() -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "Public rate limit exceeded.",
        )
    }

    pub fn arm_required() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "ARM_REQUIRED",
            "Live start requires a valid arming token.",
        )
    }

    pub fn arm_expired() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "ARM_EXPIRED",
            "Arming token expired or already used.",
        )
    }

    pub fn key_revoked() -> Self {
        Self::new(
            StatusCode::CONFLICT,
            "KEY_REVOKED",
            "Exchange key is already revoked.",
        )
    }

    pub fn invalid_id(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_ID", message)
    }

    pub fn invalid_update(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_UPDATE", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn user_exists(email: &str) -> Self {
        Self::new(
            StatusCode::CONFLICT,
            "USER_EXISTS",
            format!("User {email} already exists."),
        )
    }

    pub fn invalid_cursor() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "INVALID_CURSOR",
            "Cursor must be a non-negative integer.",
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            message,
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "detail": {
                "code": self.code,
                "message": self.message,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::internal(e.to_string())
    }
}

impl From<ControlError> for ApiError {
    fn from(e: ControlError) -> Self {
        match e {
            ControlError::ArmRequired => ApiError::arm_required(),
            ControlError::ArmExpired => ApiError::arm_expired(),
            ControlError::Backend(inner) => ApiError::internal(inner.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_errors_map_to_arming_codes() {
        assert_eq!(ApiError::from(ControlError::ArmRequired).code, "ARM_REQUIRED");
        assert_eq!(ApiError::from(ControlError::ArmExpired).code, "ARM_EXPIRED");
    }

    #[test]
    fn statuses_match_codes() {
        assert_eq!(ApiError::auth_required().status, StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::forbidden().status, StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::rate_limited().status,
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
