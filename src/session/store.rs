//! Signed cookie codec for session payloads.
//!
//! # Cookie format
//!
//! ```text
//! <payload>.<issued-at>.<signature>
//!
//! payload   = base64url(JSON {"values": {...}, "flashes": {...}})
//! issued-at = unix seconds when the cookie was saved
//! signature = hex(HMAC-SHA256(secret, "<cookie-name>|<payload>|<issued-at>"))
//! ```
//!
//! Binding the cookie name into the MAC stops a value issued for one cookie
//! from being replayed under another. Cookies that fail verification or are
//! older than the configured max age decode to a fresh, empty session.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use http::HeaderMap;
use http::header::{COOKIE, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::Sha256;
use tracing::debug;

use crate::config::Config;

type HmacSha256 = Hmac<Sha256>;

/// Browsers drop cookies larger than this.
const MAX_COOKIE_LEN: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("session cookie is {size} bytes, the limit is {MAX_COOKIE_LEN}")]
    TooLarge { size: usize },

    #[error("session cookie is not a valid header value")]
    InvalidHeader,
}

/// Everything a session cookie carries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Payload {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub(crate) values: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) flashes: BTreeMap<String, Vec<Value>>,
}

/// Encodes, signs and verifies the session cookie.
#[derive(Clone)]
pub struct SessionStore {
    name: String,
    key: Vec<u8>,
    max_age: u64,
    secure: bool,
}

impl SessionStore {
    pub fn new(name: impl Into<String>, secret: impl AsRef<[u8]>, max_age: u64, secure: bool) -> Self {
        Self {
            name: name.into(),
            key: secret.as_ref().to_vec(),
            max_age,
            secure,
        }
    }

    /// Cookies are marked `Secure` when the environment is production.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.session.name.clone(),
            config.session.secret.as_bytes(),
            config.session.max_age_secs,
            config.app.environment.is_production(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Payload from the request's session cookie, if one is present and valid.
    pub(crate) fn load(&self, headers: &HeaderMap) -> Option<Payload> {
        let value = find_cookie(headers, &self.name)?;
        self.decode_at(value, now())
    }

    pub(crate) fn encode(&self, payload: &Payload) -> Result<String, SessionError> {
        self.encode_at(payload, now())
    }

    /// Full `Set-Cookie` header value for `payload`.
    pub(crate) fn set_cookie(&self, payload: &Payload) -> Result<HeaderValue, SessionError> {
        let value = self.encode(payload)?;
        let mut cookie = format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            self.name, value, self.max_age
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).map_err(|_| SessionError::InvalidHeader)
    }

    fn encode_at(&self, payload: &Payload, issued_at: u64) -> Result<String, SessionError> {
        let data = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload)?);
        let signature = self.sign(&data, issued_at).finalize().into_bytes();
        let value = format!("{data}.{issued_at}.{}", hex::encode(signature));
        if value.len() > MAX_COOKIE_LEN {
            return Err(SessionError::TooLarge { size: value.len() });
        }
        Ok(value)
    }

    fn decode_at(&self, value: &str, now: u64) -> Option<Payload> {
        let mut parts = value.split('.');
        let (Some(data), Some(issued_at), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            debug!(cookie = %self.name, "session cookie is malformed");
            return None;
        };

        let issued_at: u64 = issued_at.parse().ok()?;
        let signature = hex::decode(signature).ok()?;
        if self.sign(data, issued_at).verify_slice(&signature).is_err() {
            debug!(cookie = %self.name, "session cookie signature mismatch");
            return None;
        }
        if now.saturating_sub(issued_at) > self.max_age {
            debug!(cookie = %self.name, issued_at, "session cookie expired");
            return None;
        }

        let json = URL_SAFE_NO_PAD.decode(data).ok()?;
        serde_json::from_slice(&json).ok()
    }

    fn sign(&self, data: &str, issued_at: u64) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size");
        mac.update(self.name.as_bytes());
        mac.update(b"|");
        mac.update(data.as_bytes());
        mac.update(b"|");
        mac.update(issued_at.to_string().as_bytes());
        mac
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Value of the first cookie called `name` across all `Cookie` headers.
fn find_cookie<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(n, _)| *n == name)
        .map(|(_, v)| v.trim_matches('"'))
}
