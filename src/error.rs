//! Error taxonomy shared by the pipeline, stores, and HTTP surface.
//!
//! Every fallible operation in the crate returns [`Error`]. The variants map
//! onto HTTP statuses in one place ([`Error::status`]) so handlers never
//! classify by message text. Upstream API failures carry the provider's
//! status and body through unchanged; connection-level failures are a
//! distinct variant that always reports 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad input: unsupported extension, empty question, missing field.
    #[error("{0}")]
    Validation(String),

    /// File or record absent.
    #[error("{0}")]
    NotFound(String),

    /// Rename target already occupied.
    #[error("{0}")]
    Conflict(String),

    /// Document parsing failed (docx/xlsx/pdf). Triggers the upload rollback.
    #[error("text extraction failed: {0}")]
    Extraction(String),

    /// Vector index backend failure.
    #[error("vector index error: {0}")]
    Index(String),

    /// The external API answered with a non-success status.
    #[error("upstream API error {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Connection failure, timeout, or an unusable response from an
    /// external endpoint. Always reports 500.
    #[error("network error: {0}")]
    Network(String),

    /// Bad or incomplete configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Index(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(e.to_string())
    }
}

impl Error {
    /// Machine-readable code for the JSON error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "bad_request",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Extraction(_) => "extraction_failed",
            Error::Index(_) => "index_error",
            Error::Upstream { .. } => "upstream_error",
            Error::Network(_) => "network_error",
            Error::Config(_) => "config_error",
            Error::Io(_) => "io_error",
        }
    }

    /// HTTP status for this error. Upstream errors pass the provider's
    /// status through so the caller sees what the provider said.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) | Error::Conflict(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Error::Extraction(_)
            | Error::Index(_)
            | Error::Network(_)
            | Error::Config(_)
            | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON error response body: `{"error": {"code": ..., "message": ...}}`.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        };
        (self.status(), Json(body)).into_response()
    }
}
