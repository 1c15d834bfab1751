//! Error taxonomy for DAV handlers and its HTTP mapping.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use std::io::{self, ErrorKind};
use tracing::error;

use crate::storage::StorageError;

#[derive(Debug)]
pub enum DavError {
    BadRequest(String),
    Unauthorized(HeaderMap),
    NotFound,
    MethodNotAllowed,
    PreconditionFailed,
    /// Detail is logged, never sent to the client.
    Internal(String),
}

impl DavError {
    /// Wraps a failure that must surface as a plain 500.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        DavError::Internal(err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            DavError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DavError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DavError::NotFound => StatusCode::NOT_FOUND,
            DavError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            DavError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            DavError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DavError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            DavError::BadRequest(msg) => (status, format!("Bad Request: {msg}")).into_response(),
            DavError::Unauthorized(headers) => (status, headers, "Unauthorized").into_response(),
            DavError::NotFound => (status, "Not Found").into_response(),
            DavError::MethodNotAllowed => (status, "Method Not Allowed").into_response(),
            DavError::PreconditionFailed => (status, "Precondition Failed").into_response(),
            DavError::Internal(detail) => {
                error!(detail, "request failed");
                (status, "Internal Server Error").into_response()
            }
        }
    }
}

impl From<StorageError> for DavError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidPath => DavError::BadRequest("invalid path".into()),
            StorageError::Io(err) => err.into(),
        }
    }
}

impl From<io::Error> for DavError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            ErrorKind::NotFound => DavError::NotFound,
            _ => DavError::Internal(err.to_string()),
        }
    }
}
