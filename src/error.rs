//! Error types.
//!
//! Two families live here. [`Error`] surfaces infrastructure failures: binding
//! a port, a bad configuration or middleware registration, a shutdown drain
//! that ran out of time. [`HttpError`] is what handlers return when a request
//! should end with a specific status and client-facing message; the
//! centralized normalizer in `error_handler` turns it into a response.

use std::fmt;

use http::StatusCode;

use crate::config::ConfigError;
use crate::middleware::RegistryError;

/// Error type returned by handlers and middleware.
///
/// Any error converts into it, so `?` works everywhere inside a handler. The
/// normalizer downcasts it back to [`HttpError`] (or one of the typed errors
/// that map onto it) to pick the status code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Infrastructure errors returned by torii's fallible startup and serving
/// operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("middleware registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("outbound http client: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// In-flight requests did not finish inside the shutdown grace period.
    #[error("shutdown grace period elapsed with {abandoned} connection(s) still open")]
    DrainTimeout { abandoned: usize },
}

/// An error that carries the HTTP status and message the client should see.
///
/// `internal` keeps the underlying cause; it is only exposed to clients when
/// the application runs in debug mode.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    message: String,
    internal: Option<BoxError>,
}

impl HttpError {
    /// Error with the canonical reason phrase of `status` as its message.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            message: status.canonical_reason().unwrap_or("Unknown Error").to_owned(),
            internal: None,
        }
    }

    pub fn with_message(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), internal: None }
    }

    /// Attach the underlying cause.
    pub fn with_internal(mut self, err: impl Into<BoxError>) -> Self {
        self.internal = Some(err.into());
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_message(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::with_message(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::with_message(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND)
    }

    pub fn internal(err: impl Into<BoxError>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR).with_internal(err)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn internal_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.internal.as_deref()
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.internal
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}
