//! HTTP error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::warn;

use streamrec_scheduler::SchedulerError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    /// The request body could not be decoded.
    #[error("invalid request body: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Scheduler(SchedulerError::Validation { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Scheduler(SchedulerError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Scheduler(SchedulerError::Controller(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Scheduler(SchedulerError::Persistence(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = status.as_u16(), "Request failed: {self}");
        }

        let mut body = json!({
            "success": false,
            "error": self.to_string(),
        });
        if let ApiError::Scheduler(SchedulerError::Validation { field, .. }) = &self {
            body["field"] = json!(field);
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamrec_scheduler::ControllerError;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::BadRequest("eof".into()), StatusCode::BAD_REQUEST),
            (
                SchedulerError::validation("title", "must not be empty").into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                SchedulerError::NotFound("abc".into()).into(),
                StatusCode::NOT_FOUND,
            ),
            (
                SchedulerError::from(ControllerError::Failed("no device".into())).into(),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status);
        }
    }
}
