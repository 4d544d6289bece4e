// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Maps domain errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use conflux_core::{ConfluxError, InvalidEvent};
use conflux_ingest::IngestError;

/// Wrapper turning workspace errors into JSON error responses.
pub struct ApiError(pub StatusCode, pub String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({"error": self.1}))).into_response()
    }
}

impl From<ConfluxError> for ApiError {
    fn from(e: ConfluxError) -> Self {
        let status = match &e {
            ConfluxError::NotFound { .. } => StatusCode::NOT_FOUND,
            ConfluxError::InvalidArgument(_) | ConfluxError::AdapterNotFound { .. } => {
                StatusCode::BAD_REQUEST
            }
            ConfluxError::Provider { .. } => StatusCode::BAD_GATEWAY,
            ConfluxError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ConfluxError::Config(_) | ConfluxError::Storage { .. } | ConfluxError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %e, "request failed");
        }
        ApiError(status, e.to_string())
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            // Unknown and inactive channels answer identically; the webhook
            // path must not reveal which one it was.
            IngestError::UnknownChannel(_) | IngestError::InactiveChannel(_) => {
                ApiError(StatusCode::NOT_FOUND, "channel not found".into())
            }
            IngestError::Invalid(InvalidEvent::BadSignature) => {
                ApiError(StatusCode::FORBIDDEN, "signature verification failed".into())
            }
            IngestError::Invalid(InvalidEvent::Malformed(msg)) => {
                ApiError(StatusCode::BAD_REQUEST, format!("malformed payload: {msg}"))
            }
            IngestError::Internal(e) => e.into(),
        }
    }
}
