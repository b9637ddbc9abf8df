//! Outgoing HTTP response being assembled for one request.
//!
//! Handlers never build this directly. They write through the
//! [`Context`](crate::Context) helpers (`json`, `no_content`, `redirect`,
//! `html`), which update the single `Response` the context owns. When the
//! chain finishes the dispatcher converts it into an `http::Response`.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue, LOCATION};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use serde::Serialize;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Content-type values written by the context helpers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    Html,  // text/html; charset=UTF-8
    Json,  // application/json; charset=UTF-8
    Text,  // text/plain; charset=UTF-8
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html => "text/html; charset=UTF-8",
            Self::Json => "application/json; charset=UTF-8",
            Self::Text => "text/plain; charset=UTF-8",
        }
    }
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// Success body shape: `{"data": <payload>}`.
#[derive(Serialize)]
pub(crate) struct Envelope<'a, T: ?Sized + Serialize> {
    pub(crate) data: &'a T,
}

// ── Response ──────────────────────────────────────────────────────────────────

/// Mutable response state. Defaults to `200 OK` with an empty body.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Default for Response {
    fn default() -> Self {
        Self { status: StatusCode::OK, headers: HeaderMap::new(), body: Bytes::new() }
    }
}

impl Response {
    pub fn status(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &Bytes { &self.body }

    /// Sets the content type unless one is already present. The first writer
    /// wins so middleware can pin a type before the handler runs.
    pub(crate) fn content_type_once(&mut self, content_type: ContentType) {
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
        }
    }

    pub(crate) fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub(crate) fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }

    pub(crate) fn write(&mut self, status: StatusCode, body: impl Into<Bytes>) {
        self.status = status;
        self.body = body.into();
    }

    /// Drops the status, body and body-describing headers a failed handler
    /// wrote. Headers set by middleware (request id, `Vary`, ...) stay.
    pub(crate) fn reset(&mut self) {
        self.status = StatusCode::OK;
        self.body = Bytes::new();
        self.headers.remove(CONTENT_TYPE);
        self.headers.remove(LOCATION);
    }

    pub(crate) fn into_http(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}
