//! Incoming HTTP request type.

use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, Uri};

/// Peer address of the connection a request arrived on.
///
/// The server stores it in the request extensions; requests dispatched
/// in-process through [`Router::handle`](crate::Router::handle) may omit it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

/// An incoming HTTP request with its body fully buffered.
pub struct Request {
    pub(crate) parts: http::request::Parts,
    pub(crate) body: Bytes,
}

impl Request {
    pub(crate) fn new(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self { parts, body }
    }

    pub fn method(&self) -> &http::Method { &self.parts.method }
    pub fn uri(&self) -> &Uri { &self.parts.uri }
    pub fn path(&self) -> &str { self.parts.uri.path() }
    pub fn query(&self) -> Option<&str> { self.parts.uri.query() }
    pub fn headers(&self) -> &HeaderMap { &self.parts.headers }
    pub fn body(&self) -> &Bytes { &self.body }

    /// Case-insensitive header lookup. Values that are not visible ASCII are
    /// treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.parts.extensions.get::<PeerAddr>().map(|p| p.0)
    }

    /// The declared media type without parameters, lowercased
    /// (`application/json; charset=utf-8` → `application/json`).
    pub fn media_type(&self) -> Option<String> {
        let raw = self.header(http::header::CONTENT_TYPE.as_str())?;
        match raw.parse::<mime::Mime>() {
            Ok(mime) => Some(mime.essence_str().to_ascii_lowercase()),
            Err(_) => Some(raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase()),
        }
    }
}
