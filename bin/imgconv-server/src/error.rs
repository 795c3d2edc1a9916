//! Unified server error type.
//!
//! Handlers return `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`]. Conversion failures answer with a
//! plain-text `400`; failures that happen before the upload is touched
//! (content type, parameters) answer with their message verbatim.
//!
//! Internal errors are logged in full but only a generic message is returned
//! to the caller.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use imgconv_core::{ConvertError, ConvertErrorKind};
use thiserror::Error;
use tracing::{error, warn};

/// All errors that can occur in the imgconv-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Rejected before the body was read; the message is sent as-is.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The upload controller or pipeline settled the request with an error.
    #[error("conversion failed: {0}")]
    Conversion(ConvertError),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ConvertError> for ServerError {
    fn from(e: ConvertError) -> Self {
        match e {
            ConvertError::Validation(message) => ServerError::BadRequest(message),
            other => ServerError::Conversion(other),
        }
    }
}

impl ServerError {
    /// Taxonomy tag for logs; internal errors have none.
    pub fn kind(&self) -> Option<ConvertErrorKind> {
        match self {
            ServerError::BadRequest(_) => Some(ConvertErrorKind::Validation),
            ServerError::Conversion(e) => Some(e.kind()),
            ServerError::Internal(_) => None,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Conversion(e) => {
                warn!(kind = %e.kind(), error = %e, "conversion rejected");
                (StatusCode::BAD_REQUEST, format!("Conversion failed: {e}"))
            }
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response()
    }
}
