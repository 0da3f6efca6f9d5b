//! HTTP response building helpers
//!
//! Provides a consistent API for building HTTP responses across all
//! handlers, including the single mapping from engine errors to status
//! codes. Store internals never reach the caller.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Response, StatusCode};
use serde::Serialize;
use tracing::error;

use crate::error::EngineError;

/// Build a JSON response with the given status code
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(json)))
        .unwrap()
}

/// Build a JSON response with 200 OK status
pub fn ok<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, body)
}

/// Build a JSON response with 201 Created status
pub fn created<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::CREATED, body)
}

/// Build a 404 Not Found response with message
pub fn not_found(message: &str) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({ "error": message }),
    )
}

/// Build a 400 Bad Request response with message
pub fn bad_request(message: &str) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::BAD_REQUEST,
        &serde_json::json!({ "error": message }),
    )
}

/// Build a 405 Method Not Allowed response
pub fn method_not_allowed() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &serde_json::json!({ "error": "method not allowed" }),
    )
}

/// Build a 429 Too Many Requests response
pub fn too_many_requests() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::TOO_MANY_REQUESTS,
        &serde_json::json!({ "error": "rate limit exceeded" }),
    )
}

/// Map an engine error to its HTTP response
pub fn error_response(err: &EngineError) -> Response<Full<Bytes>> {
    let (status, message) = match err {
        EngineError::AuthenticationRequired => {
            (StatusCode::UNAUTHORIZED, err.to_string())
        }
        EngineError::AuthorizationDenied(_) | EngineError::NotEligible { .. } => {
            (StatusCode::FORBIDDEN, err.to_string())
        }
        EngineError::Validation(_) | EngineError::Json(_) => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }
        EngineError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        EngineError::InsufficientPool { .. }
        | EngineError::DuplicateContent(_)
        | EngineError::VersionConflict { .. }
        | EngineError::AttemptClosed(_) => (StatusCode::CONFLICT, err.to_string()),
        EngineError::Io(_) | EngineError::Internal(_) => {
            // Log the detail, return a generic message
            error!(error = %err, "Internal failure");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
        }
    };

    json_response(status, &serde_json::json!({ "error": message }))
}
