//! Mapping of broker errors onto HTTP responses

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dbnet_core::DbnetError;
use serde_json::{Value, json};

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// An error answered as `{"error": "<message>"}`, or as a full record body
/// when the failure belongs to an execution the client should still see
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    body: Option<Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            body: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// A failed execution: the record is returned with its error included
    pub fn with_record(status: StatusCode, message: impl Into<String>, record: Value) -> Self {
        Self {
            status,
            message: message.into(),
            body: Some(record),
        }
    }
}

pub(crate) fn status_of(error: &DbnetError) -> StatusCode {
    match error {
        DbnetError::NotFound(_) | DbnetError::ConnectionNotFound(_) => StatusCode::NOT_FOUND,
        DbnetError::Config(_) | DbnetError::Serialization(_) => StatusCode::BAD_REQUEST,
        DbnetError::Subprocess(_) => StatusCode::BAD_GATEWAY,
        DbnetError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        DbnetError::Cancelled => StatusCode::CONFLICT,
        DbnetError::Driver(_)
        | DbnetError::ConnectionFailed(_)
        | DbnetError::Io(_)
        | DbnetError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<DbnetError> for ApiError {
    fn from(error: DbnetError) -> Self {
        Self::new(status_of(&error), error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(status = self.status.as_u16(), error = %self.message, "request failed");
        } else {
            tracing::debug!(status = self.status.as_u16(), error = %self.message, "request rejected");
        }

        let body = match self.body {
            Some(Value::Object(mut record)) => {
                record.insert("error".into(), json!(self.message));
                Value::Object(record)
            }
            _ => json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}
