//! Ingress Error Types

use axum::{
    extract::rejection::BytesRejection,
    http::{header::ALLOW, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use super::types::BufferApiResponse;
use crate::queue::QueueError;

/// Ingress error types.
#[derive(Debug, Error)]
pub enum IngressError {
    /// Anything other than POST.
    #[error("Method not allowed. Use POST to send messages.")]
    MethodNotAllowed,

    /// Missing or wrong API key.
    #[error("Invalid authentication. Provide a valid API key in the Authorization header.")]
    Unauthorized,

    /// Body could not be read, usually because it exceeds the size limit.
    #[error("{}", .0.body_text())]
    Body(BytesRejection),

    /// Body is not valid JSON.
    #[error("Invalid JSON in request body")]
    InvalidJson(#[source] serde_json::Error),

    /// Body is JSON but not an acceptable message.
    #[error("{0}")]
    Validation(String),

    /// Enqueue failed.
    #[error("Internal error while processing the message")]
    Queue(#[from] QueueError),
}

impl IngressError {
    /// HTTP status and stable error code.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Body(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE")
            }
            Self::Body(rejection) => (rejection.status(), "INVALID_BODY"),
            Self::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED"),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::InvalidJson(_) => (StatusCode::BAD_REQUEST, "INVALID_JSON"),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Self::Queue(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if let Self::Queue(e) = &self {
            tracing::error!(error = %e, "Failed to enqueue message");
        }

        let body = Json(BufferApiResponse::failure(code, self.to_string()));
        let mut response = (status, body).into_response();

        if matches!(self, Self::MethodNotAllowed) {
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("POST"));
        }

        response
    }
}
