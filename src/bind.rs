//! Strict request-body decoding behind [`Context::bind`](crate::Context::bind).
//!
//! JSON bodies are decoded strictly: unknown fields, trailing data after the
//! first value and bodies over [`MAX_BODY_BYTES`] are refused. Every failure is
//! classified into a [`BindError`] that knows the status and message the
//! client should get. Any other content type is decoded as form data.

use http::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::error::Category;

use crate::error::HttpError;

/// Largest JSON body `bind` accepts (1 MiB).
pub const MAX_BODY_BYTES: usize = 1 << 20;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BindError {
    #[error("Request body contains badly-formed JSON (at position {offset})")]
    Syntax { offset: usize },

    #[error("Request body contains badly-formed JSON")]
    UnexpectedEof,

    #[error("Request body contains an invalid value for the {field:?} field (at position {offset})")]
    InvalidValue { field: String, offset: usize },

    #[error("Request body contains unknown field {0:?}")]
    UnknownField(String),

    #[error("Request body must not be empty")]
    Empty,

    #[error("Request body must not be larger than 1MB")]
    TooLarge,

    #[error("Request body must only contain a single JSON object")]
    TrailingData,

    #[error("{0}")]
    Form(String),
}

impl BindError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<BindError> for HttpError {
    fn from(err: BindError) -> Self {
        HttpError::with_message(err.status(), err.to_string()).with_internal(err)
    }
}

pub(crate) fn json<T: DeserializeOwned>(body: &[u8]) -> Result<T, BindError> {
    if body.len() > MAX_BODY_BYTES {
        return Err(BindError::TooLarge);
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(BindError::Empty);
    }

    let mut de = serde_json::Deserializer::from_slice(body);
    let mut unknown: Option<String> = None;
    let mut track_unknown = |path: serde_ignored::Path<'_>| {
        unknown.get_or_insert_with(|| path.to_string());
    };
    let value: T = serde_path_to_error::deserialize(serde_ignored::Deserializer::new(
        &mut de,
        &mut track_unknown,
    ))
    .map_err(|e| classify(e, body))?;

    if let Some(field) = unknown {
        return Err(BindError::UnknownField(field));
    }
    de.end().map_err(|_| BindError::TrailingData)?;
    Ok(value)
}

pub(crate) fn form<T: DeserializeOwned>(body: &[u8]) -> Result<T, BindError> {
    serde_urlencoded::from_bytes(body).map_err(|e| BindError::Form(e.to_string()))
}

fn classify(err: serde_path_to_error::Error<serde_json::Error>, body: &[u8]) -> BindError {
    let field = err.path().to_string();
    let inner = err.into_inner();
    let offset = byte_offset(body, inner.line(), inner.column());
    match inner.classify() {
        Category::Eof => BindError::UnexpectedEof,
        Category::Syntax | Category::Io => BindError::Syntax { offset },
        Category::Data => BindError::InvalidValue { field, offset },
    }
}

/// serde_json reports 1-based line and column; convert to a byte offset.
fn byte_offset(body: &[u8], line: usize, column: usize) -> usize {
    let preceding: usize = body
        .split(|b| *b == b'\n')
        .take(line.saturating_sub(1))
        .map(|l| l.len() + 1)
        .sum();
    preceding + column
}
