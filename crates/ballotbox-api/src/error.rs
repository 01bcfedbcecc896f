use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use ballotbox_core::PollError;

/// API failure: the status code plus the human-readable reason that goes
/// into the JSON body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self { status: StatusCode::UNAUTHORIZED, message: message.into() }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self { status: StatusCode::FORBIDDEN, message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: message.into() }
    }

    pub fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Internal server error".into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<PollError> for ApiError {
    fn from(err: PollError) -> Self {
        let status = match &err {
            PollError::NotFound(_) => StatusCode::NOT_FOUND,
            PollError::Validation(_) | PollError::Expired(_) | PollError::DuplicateVote => {
                StatusCode::BAD_REQUEST
            }
            PollError::AccessDenied(_) => StatusCode::FORBIDDEN,
            PollError::Internal(e) => {
                error!("Poll operation failed: {e:#}");
                return Self::internal();
            }
        };
        Self { status, message: err.to_string() }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!("Request failed: {err:#}");
        Self::internal()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_errors_map_to_expected_statuses() {
        let cases = [
            (PollError::NotFound("Poll not found"), StatusCode::NOT_FOUND),
            (PollError::Validation("Title is required"), StatusCode::BAD_REQUEST),
            (PollError::Expired("Cannot edit an expired poll"), StatusCode::BAD_REQUEST),
            (PollError::DuplicateVote, StatusCode::BAD_REQUEST),
            (
                PollError::AccessDenied("You do not have access to this private poll"),
                StatusCode::FORBIDDEN,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn internal_errors_hide_the_cause() {
        let err = ApiError::from(PollError::Internal(anyhow::anyhow!("db exploded")));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "Internal server error");
    }
}
